//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Foreign keys are enabled on
//! the connection so deleting an account cascades to everything it owns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::automation::model::{
    Action, ActionFunction, AutomationMode, EmailLabel, Label, LabelAction, LinkedAction, Sop,
};
use crate::automation::run::{ActionResult, AutomationRun, RunState};
use crate::error::DatabaseError;
use crate::mail::model::{Account, Draft, EmailMessage, MailProvider};
use crate::store::migrations;
use crate::store::traits::{Database, ListFilter};
use crate::tasks::model::{Task, TaskStatus};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Account id of a label, if the label exists.
    async fn label_account(&self, label_id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT account_id FROM labels WHERE id = ?1",
                params![label_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("label_account: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(get_uuid(&row, 0, "label.account_id")?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("label_account row: {e}"))),
        }
    }

    /// Account id of an action, if the action exists.
    async fn action_account(&self, action_id: Uuid) -> Result<Option<Uuid>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT account_id FROM actions WHERE id = ?1",
                params![action_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("action_account: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(get_uuid(&row, 0, "action.account_id")?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("action_account row: {e}"))),
        }
    }

    /// Execute a DELETE by id and report whether a row went away.
    async fn delete_by_id(&self, table: &str, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                &format!("DELETE FROM {table} WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete {table}: {e}")))?;
        debug!(table, id = %id, deleted = affected > 0, "Row deleted");
        Ok(affected > 0)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

/// Map a write failure, surfacing UNIQUE / FOREIGN KEY violations as constraints.
fn write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") || msg.contains("FOREIGN KEY constraint failed") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

/// Error for an UPDATE that touched no rows.
fn require_affected(affected: u64, entity: &str, id: Uuid) -> Result<(), DatabaseError> {
    if affected == 0 {
        Err(DatabaseError::not_found(entity, id))
    } else {
        Ok(())
    }
}

fn get_string(row: &libsql::Row, idx: i32, field: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

fn get_uuid(row: &libsql::Row, idx: i32, field: &str) -> Result<Uuid, DatabaseError> {
    let raw = get_string(row, idx, field)?;
    Uuid::parse_str(&raw).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

fn get_optional_uuid(row: &libsql::Row, idx: i32) -> Option<Uuid> {
    row.get::<String>(idx)
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok())
}

fn get_bool(row: &libsql::Row, idx: i32) -> bool {
    row.get::<i64>(idx).unwrap_or(0) != 0
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_uuid(id: Option<Uuid>) -> libsql::Value {
    match id {
        Some(id) => libsql::Value::Text(id.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn addresses_to_json(addresses: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(addresses).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn addresses_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

const ACCOUNT_COLUMNS: &str =
    "id, provider, email, writing_style, signature_html, is_connected, created_at, updated_at";

fn row_to_account(row: &libsql::Row) -> Result<Account, DatabaseError> {
    let provider_str = get_string(row, 1, "account.provider")?;
    let provider: MailProvider = provider_str
        .parse()
        .map_err(DatabaseError::Serialization)?;
    Ok(Account {
        id: get_uuid(row, 0, "account.id")?,
        provider,
        email: get_string(row, 2, "account.email")?,
        writing_style: row.get::<String>(3).unwrap_or_default(),
        signature_html: row.get::<String>(4).unwrap_or_default(),
        is_connected: get_bool(row, 5),
        created_at: parse_datetime(&get_string(row, 6, "account.created_at")?),
        updated_at: parse_datetime(&get_string(row, 7, "account.updated_at")?),
    })
}

const LABEL_COLUMNS: &str = "id, account_id, name, prompt, instructions, sop_context, priority, is_active, mode, created_at, updated_at";

fn row_to_label(row: &libsql::Row) -> Result<Label, DatabaseError> {
    let mode_str: String = row.get(8).unwrap_or_else(|_| "legacy".to_string());
    Ok(Label {
        id: get_uuid(row, 0, "label.id")?,
        account_id: get_uuid(row, 1, "label.account_id")?,
        name: get_string(row, 2, "label.name")?,
        prompt: row.get::<String>(3).unwrap_or_default(),
        instructions: row.get::<String>(4).unwrap_or_default(),
        sop_context: row.get::<String>(5).ok(),
        priority: row.get::<i64>(6).unwrap_or(0) as i32,
        is_active: get_bool(row, 7),
        mode: AutomationMode::from_db(&mode_str),
        created_at: parse_datetime(&get_string(row, 9, "label.created_at")?),
        updated_at: parse_datetime(&get_string(row, 10, "label.updated_at")?),
    })
}

const ACTION_COLUMNS: &str =
    "id, account_id, name, function, instructions, tool_name, tool_description, created_at";

fn row_to_action(row: &libsql::Row) -> Result<Action, DatabaseError> {
    row_to_action_at(row, 0)
}

/// Read an action whose columns start at `base`.
fn row_to_action_at(row: &libsql::Row, base: i32) -> Result<Action, DatabaseError> {
    let function_str = get_string(row, base + 3, "action.function")?;
    let function: ActionFunction = function_str
        .parse()
        .map_err(DatabaseError::Serialization)?;
    Ok(Action {
        id: get_uuid(row, base, "action.id")?,
        account_id: get_uuid(row, base + 1, "action.account_id")?,
        name: get_string(row, base + 2, "action.name")?,
        function,
        instructions: row.get::<String>(base + 4).unwrap_or_default(),
        tool_name: row.get::<String>(base + 5).ok(),
        tool_description: row.get::<String>(base + 6).unwrap_or_default(),
        created_at: parse_datetime(&get_string(row, base + 7, "action.created_at")?),
    })
}

const SOP_COLUMNS: &str =
    "id, account_id, name, description, instructions, priority, is_active, created_at, updated_at";

fn row_to_sop(row: &libsql::Row) -> Result<Sop, DatabaseError> {
    Ok(Sop {
        id: get_uuid(row, 0, "sop.id")?,
        account_id: get_uuid(row, 1, "sop.account_id")?,
        name: get_string(row, 2, "sop.name")?,
        description: row.get::<String>(3).unwrap_or_default(),
        instructions: row.get::<String>(4).unwrap_or_default(),
        priority: row.get::<i64>(5).unwrap_or(0) as i32,
        is_active: get_bool(row, 6),
        created_at: parse_datetime(&get_string(row, 7, "sop.created_at")?),
        updated_at: parse_datetime(&get_string(row, 8, "sop.updated_at")?),
    })
}

const EMAIL_COLUMNS: &str = "id, account_id, external_message_id, thread_id, subject, from_address, from_name, to_addresses, body_html, date_sent, created_at";

fn row_to_email(row: &libsql::Row) -> Result<EmailMessage, DatabaseError> {
    let to_raw: String = row.get(7).unwrap_or_else(|_| "[]".to_string());
    Ok(EmailMessage {
        id: get_uuid(row, 0, "email.id")?,
        account_id: get_uuid(row, 1, "email.account_id")?,
        external_message_id: get_string(row, 2, "email.external_message_id")?,
        thread_id: row.get::<String>(3).ok(),
        subject: row.get::<String>(4).unwrap_or_default(),
        from_address: get_string(row, 5, "email.from_address")?,
        from_name: row.get::<String>(6).unwrap_or_default(),
        to_addresses: addresses_from_json(&to_raw),
        body_html: row.get::<String>(8).unwrap_or_default(),
        date_sent: parse_optional_datetime(row.get::<String>(9).ok()),
        created_at: parse_datetime(&get_string(row, 10, "email.created_at")?),
    })
}

const DRAFT_COLUMNS: &str =
    "id, account_id, email_id, subject, body_html, to_addresses, created_at, updated_at";

fn row_to_draft(row: &libsql::Row) -> Result<Draft, DatabaseError> {
    let to_raw: String = row.get(5).unwrap_or_else(|_| "[]".to_string());
    Ok(Draft {
        id: get_uuid(row, 0, "draft.id")?,
        account_id: get_uuid(row, 1, "draft.account_id")?,
        email_id: get_optional_uuid(row, 2),
        subject: get_string(row, 3, "draft.subject")?,
        body_html: get_string(row, 4, "draft.body_html")?,
        to_addresses: addresses_from_json(&to_raw),
        created_at: parse_datetime(&get_string(row, 6, "draft.created_at")?),
        updated_at: parse_datetime(&get_string(row, 7, "draft.updated_at")?),
    })
}

const TASK_COLUMNS: &str = "id, account_id, email_id, thread_id, title, description, priority, status, due_at, created_at, updated_at";

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let status_str: String = row.get(7).unwrap_or_else(|_| "pending".to_string());
    Ok(Task {
        id: get_uuid(row, 0, "task.id")?,
        account_id: get_uuid(row, 1, "task.account_id")?,
        email_id: get_optional_uuid(row, 2),
        thread_id: row.get::<String>(3).ok(),
        title: get_string(row, 4, "task.title")?,
        description: row.get::<String>(5).unwrap_or_default(),
        priority: row.get::<i64>(6).unwrap_or(1) as i32,
        status: TaskStatus::from_db(&status_str),
        due_at: parse_optional_datetime(row.get::<String>(8).ok()),
        created_at: parse_datetime(&get_string(row, 9, "task.created_at")?),
        updated_at: parse_datetime(&get_string(row, 10, "task.updated_at")?),
    })
}

const RUN_COLUMNS: &str = "id, label_id, email_id, mode, state, reasoning, results, error, error_kind, input_tokens, output_tokens, started_at, completed_at";

fn row_to_run(row: &libsql::Row) -> Result<AutomationRun, DatabaseError> {
    let mode_str: String = row.get(3).unwrap_or_else(|_| "legacy".to_string());
    let state_str: String = row.get(4).unwrap_or_else(|_| "pending".to_string());
    let results_raw: String = row.get(6).unwrap_or_else(|_| "[]".to_string());
    let results: Vec<ActionResult> = serde_json::from_str(&results_raw)
        .map_err(|e| DatabaseError::Serialization(format!("run.results: {e}")))?;
    Ok(AutomationRun {
        id: get_uuid(row, 0, "run.id")?,
        label_id: get_uuid(row, 1, "run.label_id")?,
        email_id: get_uuid(row, 2, "run.email_id")?,
        mode: AutomationMode::from_db(&mode_str),
        state: RunState::from_db(&state_str),
        reasoning: row.get::<String>(5).ok(),
        results,
        error: row.get::<String>(7).ok(),
        error_kind: row.get::<String>(8).ok(),
        input_tokens: row.get::<i64>(9).unwrap_or(0) as u32,
        output_tokens: row.get::<i64>(10).unwrap_or(0) as u32,
        started_at: parse_datetime(&get_string(row, 11, "run.started_at")?),
        completed_at: parse_optional_datetime(row.get::<String>(12).ok()),
    })
}

/// Drain a row cursor through a mapper.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => out.push(map(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op} row: {e}"))),
        }
    }
    Ok(out)
}

/// First row through a mapper, or `None`.
async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(map(&row)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op} row: {e}"))),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn create_account(&self, account: &Account) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    account.id.to_string(),
                    account.provider.as_str(),
                    account.email.as_str(),
                    account.writing_style.as_str(),
                    account.signature_html.as_str(),
                    account.is_connected as i64,
                    account.created_at.to_rfc3339(),
                    account.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_account", e))?;
        debug!(id = %account.id, email = %account.email, "Account created");
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account: {e}")))?;
        first_row(rows, "get_account", row_to_account).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY email ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts: {e}")))?;
        collect_rows(rows, "list_accounts", row_to_account).await
    }

    async fn update_account(&self, account: &Account) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE accounts SET provider = ?2, email = ?3, writing_style = ?4, signature_html = ?5, is_connected = ?6, updated_at = ?7 WHERE id = ?1",
                params![
                    account.id.to_string(),
                    account.provider.as_str(),
                    account.email.as_str(),
                    account.writing_style.as_str(),
                    account.signature_html.as_str(),
                    account.is_connected as i64,
                    account.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("update_account", e))?;
        require_affected(affected, "account", account.id)
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.delete_by_id("accounts", id).await
    }

    // ── Labels ──────────────────────────────────────────────────────

    async fn create_label(&self, label: &Label) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO labels ({LABEL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    label.id.to_string(),
                    label.account_id.to_string(),
                    label.name.as_str(),
                    label.prompt.as_str(),
                    label.instructions.as_str(),
                    opt_text(label.sop_context.as_deref()),
                    label.priority as i64,
                    label.is_active as i64,
                    label.mode.as_str(),
                    label.created_at.to_rfc3339(),
                    label.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_label", e))?;
        debug!(id = %label.id, name = %label.name, "Label created");
        Ok(())
    }

    async fn get_label(&self, id: Uuid) -> Result<Option<Label>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_label: {e}")))?;
        first_row(rows, "get_label", row_to_label).await
    }

    async fn list_labels(&self, account_id: Option<Uuid>) -> Result<Vec<Label>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE (?1 IS NULL OR account_id = ?1) ORDER BY priority DESC, name ASC"),
                params![opt_uuid(account_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_labels: {e}")))?;
        collect_rows(rows, "list_labels", row_to_label).await
    }

    async fn list_active_labels(&self, account_id: Uuid) -> Result<Vec<Label>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE account_id = ?1 AND is_active = 1 ORDER BY priority DESC, name ASC"),
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_labels: {e}")))?;
        collect_rows(rows, "list_active_labels", row_to_label).await
    }

    async fn update_label(&self, label: &Label) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE labels SET name = ?2, prompt = ?3, instructions = ?4, sop_context = ?5, priority = ?6, is_active = ?7, mode = ?8, updated_at = ?9 WHERE id = ?1",
                params![
                    label.id.to_string(),
                    label.name.as_str(),
                    label.prompt.as_str(),
                    label.instructions.as_str(),
                    opt_text(label.sop_context.as_deref()),
                    label.priority as i64,
                    label.is_active as i64,
                    label.mode.as_str(),
                    label.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("update_label", e))?;
        require_affected(affected, "label", label.id)
    }

    async fn delete_label(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.delete_by_id("labels", id).await
    }

    // ── Actions ─────────────────────────────────────────────────────

    async fn create_action(&self, action: &Action) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO actions ({ACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    action.id.to_string(),
                    action.account_id.to_string(),
                    action.name.as_str(),
                    action.function.as_str(),
                    action.instructions.as_str(),
                    opt_text(action.tool_name.as_deref()),
                    action.tool_description.as_str(),
                    action.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_action", e))?;
        debug!(id = %action.id, name = %action.name, function = %action.function, "Action created");
        Ok(())
    }

    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACTION_COLUMNS} FROM actions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_action: {e}")))?;
        first_row(rows, "get_action", row_to_action).await
    }

    async fn list_actions(&self, account_id: Option<Uuid>) -> Result<Vec<Action>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ACTION_COLUMNS} FROM actions WHERE (?1 IS NULL OR account_id = ?1) ORDER BY name ASC"),
                params![opt_uuid(account_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_actions: {e}")))?;
        collect_rows(rows, "list_actions", row_to_action).await
    }

    async fn update_action(&self, action: &Action) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE actions SET name = ?2, function = ?3, instructions = ?4, tool_name = ?5, tool_description = ?6 WHERE id = ?1",
                params![
                    action.id.to_string(),
                    action.name.as_str(),
                    action.function.as_str(),
                    action.instructions.as_str(),
                    opt_text(action.tool_name.as_deref()),
                    action.tool_description.as_str(),
                ],
            )
            .await
            .map_err(|e| write_err("update_action", e))?;
        require_affected(affected, "action", action.id)
    }

    async fn delete_action(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.delete_by_id("actions", id).await
    }

    // ── Label ↔ Action links ────────────────────────────────────────

    async fn link_action(
        &self,
        label_id: Uuid,
        action_id: Uuid,
        order: i32,
    ) -> Result<LabelAction, DatabaseError> {
        let label_account = self
            .label_account(label_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("label", label_id))?;
        let action_account = self
            .action_account(action_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("action", action_id))?;
        if label_account != action_account {
            return Err(DatabaseError::Constraint(format!(
                "label {label_id} and action {action_id} belong to different accounts"
            )));
        }

        self.conn()
            .execute(
                "INSERT INTO label_actions (label_id, action_id, position) VALUES (?1, ?2, ?3)",
                params![label_id.to_string(), action_id.to_string(), order as i64],
            )
            .await
            .map_err(|e| write_err("link_action", e))?;
        debug!(label_id = %label_id, action_id = %action_id, order, "Action linked to label");
        Ok(LabelAction {
            label_id,
            action_id,
            order,
        })
    }

    async fn unlink_action(&self, label_id: Uuid, action_id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM label_actions WHERE label_id = ?1 AND action_id = ?2",
                params![label_id.to_string(), action_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("unlink_action: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_label_actions(&self, label_id: Uuid) -> Result<Vec<LinkedAction>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT la.position, a.id, a.account_id, a.name, a.function, a.instructions, a.tool_name, a.tool_description, a.created_at
                 FROM label_actions la JOIN actions a ON a.id = la.action_id
                 WHERE la.label_id = ?1
                 ORDER BY la.position ASC, a.name ASC",
                params![label_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_label_actions: {e}")))?;

        fn map(row: &libsql::Row) -> Result<LinkedAction, DatabaseError> {
            Ok(LinkedAction {
                order: row.get::<i64>(0).map_err(|e| {
                    DatabaseError::Serialization(format!("label_actions.position: {e}"))
                })? as i32,
                action: row_to_action_at(row, 1)?,
            })
        }
        collect_rows(rows, "list_label_actions", map).await
    }

    // ── SOPs ────────────────────────────────────────────────────────

    async fn create_sop(&self, sop: &Sop) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO sops ({SOP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    sop.id.to_string(),
                    sop.account_id.to_string(),
                    sop.name.as_str(),
                    sop.description.as_str(),
                    sop.instructions.as_str(),
                    sop.priority as i64,
                    sop.is_active as i64,
                    sop.created_at.to_rfc3339(),
                    sop.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_sop", e))?;
        debug!(id = %sop.id, name = %sop.name, "SOP created");
        Ok(())
    }

    async fn get_sop(&self, id: Uuid) -> Result<Option<Sop>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {SOP_COLUMNS} FROM sops WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_sop: {e}")))?;
        first_row(rows, "get_sop", row_to_sop).await
    }

    async fn list_sops(&self, account_id: Option<Uuid>) -> Result<Vec<Sop>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {SOP_COLUMNS} FROM sops WHERE (?1 IS NULL OR account_id = ?1) ORDER BY priority DESC, name ASC"),
                params![opt_uuid(account_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sops: {e}")))?;
        collect_rows(rows, "list_sops", row_to_sop).await
    }

    async fn list_active_sops(&self, account_id: Uuid) -> Result<Vec<Sop>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {SOP_COLUMNS} FROM sops WHERE account_id = ?1 AND is_active = 1 ORDER BY priority DESC, name ASC"),
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_sops: {e}")))?;
        collect_rows(rows, "list_active_sops", row_to_sop).await
    }

    async fn update_sop(&self, sop: &Sop) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE sops SET name = ?2, description = ?3, instructions = ?4, priority = ?5, is_active = ?6, updated_at = ?7 WHERE id = ?1",
                params![
                    sop.id.to_string(),
                    sop.name.as_str(),
                    sop.description.as_str(),
                    sop.instructions.as_str(),
                    sop.priority as i64,
                    sop.is_active as i64,
                    sop.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("update_sop", e))?;
        require_affected(affected, "sop", sop.id)
    }

    async fn delete_sop(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.delete_by_id("sops", id).await
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &EmailMessage) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO email_messages ({EMAIL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    email.id.to_string(),
                    email.account_id.to_string(),
                    email.external_message_id.as_str(),
                    opt_text(email.thread_id.as_deref()),
                    email.subject.as_str(),
                    email.from_address.as_str(),
                    email.from_name.as_str(),
                    addresses_to_json(&email.to_addresses)?,
                    email.body_html.as_str(),
                    opt_datetime(email.date_sent),
                    email.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("insert_email", e))?;
        debug!(id = %email.id, external_id = %email.external_message_id, "Email cached");
        Ok(())
    }

    async fn get_email(&self, id: Uuid) -> Result<Option<EmailMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM email_messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;
        first_row(rows, "get_email", row_to_email).await
    }

    async fn list_emails(&self, account_id: Option<Uuid>) -> Result<Vec<EmailMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM email_messages WHERE (?1 IS NULL OR account_id = ?1) ORDER BY created_at DESC"),
                params![opt_uuid(account_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_emails: {e}")))?;
        collect_rows(rows, "list_emails", row_to_email).await
    }

    async fn list_thread_emails(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<EmailMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM email_messages WHERE account_id = ?1 AND thread_id = ?2 ORDER BY created_at ASC, rowid ASC"),
                params![account_id.to_string(), thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_thread_emails: {e}")))?;
        collect_rows(rows, "list_thread_emails", row_to_email).await
    }

    async fn add_email_label(&self, email_id: Uuid, label_id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO email_labels (email_id, label_id, created_at) VALUES (?1, ?2, ?3)",
                params![
                    email_id.to_string(),
                    label_id.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("add_email_label", e))?;
        Ok(affected > 0)
    }

    async fn list_email_labels(&self, email_id: Uuid) -> Result<Vec<EmailLabel>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT email_id, label_id, created_at FROM email_labels WHERE email_id = ?1 ORDER BY created_at ASC",
                params![email_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_email_labels: {e}")))?;

        fn map(row: &libsql::Row) -> Result<EmailLabel, DatabaseError> {
            Ok(EmailLabel {
                email_id: get_uuid(row, 0, "email_label.email_id")?,
                label_id: get_uuid(row, 1, "email_label.label_id")?,
                created_at: parse_datetime(&get_string(row, 2, "email_label.created_at")?),
            })
        }
        collect_rows(rows, "list_email_labels", map).await
    }

    // ── Drafts ──────────────────────────────────────────────────────

    async fn create_draft(&self, draft: &Draft) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO drafts ({DRAFT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    draft.id.to_string(),
                    draft.account_id.to_string(),
                    opt_uuid(draft.email_id),
                    draft.subject.as_str(),
                    draft.body_html.as_str(),
                    addresses_to_json(&draft.to_addresses)?,
                    draft.created_at.to_rfc3339(),
                    draft.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_draft", e))?;
        debug!(id = %draft.id, subject = %draft.subject, "Draft created");
        Ok(())
    }

    async fn get_draft(&self, id: Uuid) -> Result<Option<Draft>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_draft: {e}")))?;
        first_row(rows, "get_draft", row_to_draft).await
    }

    async fn list_drafts(&self, filter: ListFilter) -> Result<Vec<Draft>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE (?1 IS NULL OR account_id = ?1) AND (?2 IS NULL OR email_id = ?2) ORDER BY created_at DESC"),
                params![opt_uuid(filter.account_id), opt_uuid(filter.email_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_drafts: {e}")))?;
        collect_rows(rows, "list_drafts", row_to_draft).await
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    task.id.to_string(),
                    task.account_id.to_string(),
                    opt_uuid(task.email_id),
                    opt_text(task.thread_id.as_deref()),
                    task.title.as_str(),
                    task.description.as_str(),
                    task.priority as i64,
                    task.status.as_str(),
                    opt_datetime(task.due_at),
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err("create_task", e))?;
        debug!(id = %task.id, title = %task.title, priority = task.priority, "Task created");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;
        first_row(rows, "get_task", row_to_task).await
    }

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET title = ?2, description = ?3, priority = ?4, status = ?5, due_at = ?6, updated_at = ?7, email_id = ?8 WHERE id = ?1",
                params![
                    task.id.to_string(),
                    task.title.as_str(),
                    task.description.as_str(),
                    task.priority as i64,
                    task.status.as_str(),
                    opt_datetime(task.due_at),
                    task.updated_at.to_rfc3339(),
                    opt_uuid(task.email_id),
                ],
            )
            .await
            .map_err(|e| write_err("update_task", e))?;
        require_affected(affected, "task", task.id)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.delete_by_id("tasks", id).await
    }

    async fn find_task_for_email(&self, email_id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE email_id = ?1 ORDER BY created_at ASC LIMIT 1"),
                params![email_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_task_for_email: {e}")))?;
        first_row(rows, "find_task_for_email", row_to_task).await
    }

    async fn list_tasks(&self, filter: ListFilter) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE (?1 IS NULL OR account_id = ?1) AND (?2 IS NULL OR email_id = ?2) ORDER BY priority DESC, created_at ASC"),
                params![opt_uuid(filter.account_id), opt_uuid(filter.email_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;
        collect_rows(rows, "list_tasks", row_to_task).await
    }

    async fn list_thread_tasks(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE account_id = ?1 AND thread_id = ?2 ORDER BY created_at DESC, rowid DESC"),
                params![account_id.to_string(), thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_thread_tasks: {e}")))?;
        collect_rows(rows, "list_thread_tasks", row_to_task).await
    }

    // ── Automation runs ─────────────────────────────────────────────

    async fn create_run(&self, run: &AutomationRun) -> Result<(), DatabaseError> {
        let results = serde_json::to_string(&run.results)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                &format!("INSERT INTO automation_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
                params![
                    run.id.to_string(),
                    run.label_id.to_string(),
                    run.email_id.to_string(),
                    run.mode.as_str(),
                    run.state.as_str(),
                    opt_text(run.reasoning.as_deref()),
                    results,
                    opt_text(run.error.as_deref()),
                    opt_text(run.error_kind.as_deref()),
                    run.input_tokens as i64,
                    run.output_tokens as i64,
                    run.started_at.to_rfc3339(),
                    opt_datetime(run.completed_at),
                ],
            )
            .await
            .map_err(|e| write_err("create_run", e))?;
        debug!(id = %run.id, label_id = %run.label_id, email_id = %run.email_id, "Run recorded");
        Ok(())
    }

    async fn update_run(&self, run: &AutomationRun) -> Result<(), DatabaseError> {
        let results = serde_json::to_string(&run.results)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let affected = self
            .conn()
            .execute(
                "UPDATE automation_runs SET mode = ?2, state = ?3, reasoning = ?4, results = ?5, error = ?6, error_kind = ?7, input_tokens = ?8, output_tokens = ?9, completed_at = ?10 WHERE id = ?1",
                params![
                    run.id.to_string(),
                    run.mode.as_str(),
                    run.state.as_str(),
                    opt_text(run.reasoning.as_deref()),
                    results,
                    opt_text(run.error.as_deref()),
                    opt_text(run.error_kind.as_deref()),
                    run.input_tokens as i64,
                    run.output_tokens as i64,
                    opt_datetime(run.completed_at),
                ],
            )
            .await
            .map_err(|e| write_err("update_run", e))?;
        require_affected(affected, "automation_run", run.id)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<AutomationRun>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM automation_runs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_run: {e}")))?;
        first_row(rows, "get_run", row_to_run).await
    }

    async fn list_runs(&self, filter: ListFilter) -> Result<Vec<AutomationRun>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM automation_runs
                     WHERE (?1 IS NULL OR email_id IN (SELECT id FROM email_messages WHERE account_id = ?1))
                       AND (?2 IS NULL OR email_id = ?2)
                     ORDER BY started_at DESC"
                ),
                params![opt_uuid(filter.account_id), opt_uuid(filter.email_id)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?;
        collect_rows(rows, "list_runs", row_to_run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn seeded_account(db: &LibSqlBackend) -> Account {
        let account = Account::new(MailProvider::Gmail, "ops@plumbing.example")
            .with_writing_style("Friendly, short sentences.");
        db.create_account(&account).await.unwrap();
        account
    }

    // ── Account tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn account_round_trip_and_uniqueness() {
        let db = test_db().await;
        let account = seeded_account(&db).await;

        let fetched = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(fetched, account);

        let dup = Account::new(MailProvider::Gmail, "ops@plumbing.example");
        let err = db.create_account(&dup).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        // Same address on another provider is a different account.
        let other = Account::new(MailProvider::Microsoft, "ops@plumbing.example");
        db.create_account(&other).await.unwrap();
        assert_eq!(db.list_accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deleting_account_cascades() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let label = Label::new(account.id, "Quotes");
        db.create_label(&label).await.unwrap();

        assert!(db.delete_account(account.id).await.unwrap());
        assert!(db.get_label(label.id).await.unwrap().is_none());
        assert!(!db.delete_account(account.id).await.unwrap());
    }

    // ── Label / Action / SOP tests ──────────────────────────────────

    #[tokio::test]
    async fn label_round_trip_preserves_fields() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let label = Label::new(account.id, "Quotes")
            .with_prompt("Customer asks for a price")
            .with_instructions("Reply with a quote range")
            .with_sop_context("Always mention call-out fee")
            .with_priority(7)
            .with_mode(AutomationMode::Ai);
        db.create_label(&label).await.unwrap();

        let fetched = db.get_label(label.id).await.unwrap().unwrap();
        assert_eq!(fetched, label);

        let dup = Label::new(account.id, "Quotes");
        assert!(matches!(
            db.create_label(&dup).await.unwrap_err(),
            DatabaseError::Constraint(_)
        ));
    }

    #[tokio::test]
    async fn update_missing_label_is_not_found() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let label = Label::new(account.id, "Ghost");
        let err = db.update_label(&label).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn action_round_trip_preserves_fields() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let action = Action::new(account.id, "Reply to quote", ActionFunction::DraftReply)
            .with_instructions("Keep it under 120 words")
            .with_tool_name("reply_with_quote")
            .with_tool_description("Reply with an indicative quote");
        db.create_action(&action).await.unwrap();

        let fetched = db.get_action(action.id).await.unwrap().unwrap();
        assert_eq!(fetched, action);
    }

    #[tokio::test]
    async fn active_sops_order_by_priority_then_name() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let low = Sop::new(account.id, "Low").with_priority(5);
        let high = Sop::new(account.id, "High").with_priority(10);
        let tie_b = Sop::new(account.id, "Bravo").with_priority(5);
        let mut inactive = Sop::new(account.id, "Disabled").with_priority(99);
        inactive.is_active = false;
        for sop in [&low, &high, &tie_b, &inactive] {
            db.create_sop(sop).await.unwrap();
        }

        let names: Vec<_> = db
            .list_active_sops(account.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["High", "Bravo", "Low"]);
        assert_eq!(db.list_sops(Some(account.id)).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn linked_actions_come_back_in_order() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let label = Label::new(account.id, "Quotes");
        db.create_label(&label).await.unwrap();
        let second = Action::new(account.id, "Task", ActionFunction::CreateTask);
        let first = Action::new(account.id, "Reply", ActionFunction::DraftReply);
        db.create_action(&second).await.unwrap();
        db.create_action(&first).await.unwrap();

        db.link_action(label.id, second.id, 2).await.unwrap();
        db.link_action(label.id, first.id, 1).await.unwrap();

        let linked = db.list_label_actions(label.id).await.unwrap();
        let ids: Vec<_> = linked.iter().map(|l| l.action.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(linked[0].order, 1);

        let dup = db.link_action(label.id, first.id, 3).await.unwrap_err();
        assert!(matches!(dup, DatabaseError::Constraint(_)));

        assert!(db.unlink_action(label.id, first.id).await.unwrap());
        assert_eq!(db.list_label_actions(label.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_link_order_is_an_error() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let label = Label::new(account.id, "Quotes");
        db.create_label(&label).await.unwrap();
        let action = Action::new(account.id, "Reply", ActionFunction::DraftReply);
        db.create_action(&action).await.unwrap();
        db.link_action(label.id, action.id, 1).await.unwrap();

        db.conn()
            .execute(
                "UPDATE label_actions SET position = 'first' WHERE label_id = ?1",
                params![label.id.to_string()],
            )
            .await
            .unwrap();

        let err = db.list_label_actions(label.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Serialization(_)), "{err}");
    }

    #[tokio::test]
    async fn cross_account_link_rejected() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let other = Account::new(MailProvider::Microsoft, "other@example.com");
        db.create_account(&other).await.unwrap();

        let label = Label::new(account.id, "Quotes");
        db.create_label(&label).await.unwrap();
        let foreign = Action::new(other.id, "Reply", ActionFunction::DraftReply);
        db.create_action(&foreign).await.unwrap();

        let err = db.link_action(label.id, foreign.id, 1).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let missing = db.link_action(label.id, Uuid::new_v4(), 1).await.unwrap_err();
        assert!(matches!(missing, DatabaseError::NotFound { .. }));
    }

    // ── Mail / task / run tests ─────────────────────────────────────

    #[tokio::test]
    async fn email_labels_are_idempotent() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let mut email = EmailMessage::new(account.id, "msg-1", "jo@customer.com", "Leak")
            .with_thread("thread-1")
            .with_body("<p>Tap is leaking</p>");
        email.to_addresses = vec!["ops@plumbing.example".into()];
        db.insert_email(&email).await.unwrap();
        assert_eq!(db.get_email(email.id).await.unwrap().unwrap(), email);

        let label = Label::new(account.id, "Urgent");
        db.create_label(&label).await.unwrap();
        assert!(db.add_email_label(email.id, label.id).await.unwrap());
        assert!(!db.add_email_label(email.id, label.id).await.unwrap());
        assert_eq!(db.list_email_labels(email.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_task_for_email_returns_oldest() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let email = EmailMessage::new(account.id, "msg-1", "jo@customer.com", "Leak");
        db.insert_email(&email).await.unwrap();
        assert!(db.find_task_for_email(email.id).await.unwrap().is_none());

        let task = Task::new(account.id, "Fix leak")
            .with_email(email.id, Some("thread-1".into()))
            .with_priority(4);
        db.create_task(&task).await.unwrap();

        let found = db.find_task_for_email(email.id).await.unwrap().unwrap();
        assert_eq!(found, task);
        assert_eq!(db.list_tasks(ListFilter::email(email.id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_updates_persist() {
        let db = test_db().await;
        let account = seeded_account(&db).await;
        let email = EmailMessage::new(account.id, "msg-1", "jo@customer.com", "Leak");
        db.insert_email(&email).await.unwrap();

        let mut run = AutomationRun::new(Uuid::new_v4(), email.id, AutomationMode::Legacy);
        db.create_run(&run).await.unwrap();

        run.transition_to(RunState::LegacyExecuting).unwrap();
        run.results.push(ActionResult {
            action_id: Uuid::new_v4(),
            action_name: "Notify".into(),
            function: ActionFunction::Notify,
            tool_call_id: None,
            success: true,
            output: serde_json::json!({"placeholder": true}),
        });
        run.transition_to(RunState::Completed).unwrap();
        db.update_run(&run).await.unwrap();

        let fetched = db.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched, run);

        let by_account = db.list_runs(ListFilter::account(account.id)).await.unwrap();
        assert_eq!(by_account.len(), 1);
        let other_account = db.list_runs(ListFilter::account(Uuid::new_v4())).await.unwrap();
        assert!(other_account.is_empty());
    }

    #[tokio::test]
    async fn file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("email-ops.db");

        let account_id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            seeded_account(&db).await.id
        };

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.get_account(account_id).await.unwrap().is_some());
    }
}
