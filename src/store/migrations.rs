//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "automation_config",
        sql: r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                email TEXT NOT NULL,
                writing_style TEXT NOT NULL DEFAULT '',
                signature_html TEXT NOT NULL DEFAULT '',
                is_connected INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (provider, email)
            );

            CREATE TABLE IF NOT EXISTS labels (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                prompt TEXT NOT NULL DEFAULT '',
                instructions TEXT NOT NULL DEFAULT '',
                sop_context TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                mode TEXT NOT NULL DEFAULT 'legacy',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (account_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_labels_account ON labels(account_id);

            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                function TEXT NOT NULL,
                instructions TEXT NOT NULL DEFAULT '',
                tool_name TEXT,
                tool_description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_actions_account ON actions(account_id);

            CREATE TABLE IF NOT EXISTS label_actions (
                label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
                action_id TEXT NOT NULL REFERENCES actions(id) ON DELETE CASCADE,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (label_id, action_id)
            );

            CREATE TABLE IF NOT EXISTS sops (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                instructions TEXT NOT NULL DEFAULT '',
                priority INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sops_account ON sops(account_id, is_active);
        "#,
    },
    Migration {
        version: 2,
        name: "mail_and_runs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS email_messages (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                external_message_id TEXT NOT NULL,
                thread_id TEXT,
                subject TEXT NOT NULL DEFAULT '',
                from_address TEXT NOT NULL,
                from_name TEXT NOT NULL DEFAULT '',
                to_addresses TEXT NOT NULL DEFAULT '[]',
                body_html TEXT NOT NULL DEFAULT '',
                date_sent TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (account_id, external_message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_email_messages_thread ON email_messages(thread_id);

            CREATE TABLE IF NOT EXISTS email_labels (
                email_id TEXT NOT NULL REFERENCES email_messages(id) ON DELETE CASCADE,
                label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                PRIMARY KEY (email_id, label_id)
            );

            CREATE TABLE IF NOT EXISTS drafts (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                email_id TEXT REFERENCES email_messages(id) ON DELETE SET NULL,
                subject TEXT NOT NULL,
                body_html TEXT NOT NULL,
                to_addresses TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_drafts_email ON drafts(email_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                email_id TEXT REFERENCES email_messages(id) ON DELETE SET NULL,
                thread_id TEXT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                priority INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'pending',
                due_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_email ON tasks(email_id);

            CREATE TABLE IF NOT EXISTS automation_runs (
                id TEXT PRIMARY KEY,
                label_id TEXT NOT NULL,
                email_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                state TEXT NOT NULL,
                reasoning TEXT,
                results TEXT NOT NULL DEFAULT '[]',
                error TEXT,
                error_kind TEXT,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_automation_runs_email ON automation_runs(email_id);
            CREATE INDEX IF NOT EXISTS idx_automation_runs_label ON automation_runs(label_id);
        "#,
    },
    Migration {
        version: 3,
        name: "task_threads",
        sql: "CREATE INDEX IF NOT EXISTS idx_tasks_thread ON tasks(account_id, thread_id);",
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
