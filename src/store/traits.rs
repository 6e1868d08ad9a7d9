//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::automation::model::{Action, EmailLabel, Label, LabelAction, LinkedAction, Sop};
use crate::automation::run::AutomationRun;
use crate::error::DatabaseError;
use crate::mail::model::{Account, Draft, EmailMessage};
use crate::tasks::model::Task;

/// Optional filters for list queries.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub account_id: Option<Uuid>,
    #[serde(default)]
    pub email_id: Option<Uuid>,
}

impl ListFilter {
    pub fn account(account_id: Uuid) -> Self {
        Self {
            account_id: Some(account_id),
            email_id: None,
        }
    }

    pub fn email(email_id: Uuid) -> Self {
        Self {
            account_id: None,
            email_id: Some(email_id),
        }
    }
}

/// Backend-agnostic database trait covering configuration, mail and runs.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    async fn create_account(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, DatabaseError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    async fn update_account(&self, account: &Account) -> Result<(), DatabaseError>;

    /// Delete an account and everything it owns. Returns false if absent.
    async fn delete_account(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Labels ──────────────────────────────────────────────────────

    async fn create_label(&self, label: &Label) -> Result<(), DatabaseError>;

    async fn get_label(&self, id: Uuid) -> Result<Option<Label>, DatabaseError>;

    /// Labels ordered by priority (desc) then name.
    async fn list_labels(&self, account_id: Option<Uuid>) -> Result<Vec<Label>, DatabaseError>;

    /// Active labels of an account, ordered by priority (desc) then name.
    async fn list_active_labels(&self, account_id: Uuid) -> Result<Vec<Label>, DatabaseError>;

    async fn update_label(&self, label: &Label) -> Result<(), DatabaseError>;

    async fn delete_label(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Actions ─────────────────────────────────────────────────────

    async fn create_action(&self, action: &Action) -> Result<(), DatabaseError>;

    async fn get_action(&self, id: Uuid) -> Result<Option<Action>, DatabaseError>;

    async fn list_actions(&self, account_id: Option<Uuid>) -> Result<Vec<Action>, DatabaseError>;

    async fn update_action(&self, action: &Action) -> Result<(), DatabaseError>;

    async fn delete_action(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Label ↔ Action links ────────────────────────────────────────

    /// Link an action to a label. Both must belong to the same account and
    /// the pair must not already be linked.
    async fn link_action(
        &self,
        label_id: Uuid,
        action_id: Uuid,
        order: i32,
    ) -> Result<LabelAction, DatabaseError>;

    async fn unlink_action(&self, label_id: Uuid, action_id: Uuid) -> Result<bool, DatabaseError>;

    /// Actions linked to a label, ascending by order.
    async fn list_label_actions(&self, label_id: Uuid) -> Result<Vec<LinkedAction>, DatabaseError>;

    // ── SOPs ────────────────────────────────────────────────────────

    async fn create_sop(&self, sop: &Sop) -> Result<(), DatabaseError>;

    async fn get_sop(&self, id: Uuid) -> Result<Option<Sop>, DatabaseError>;

    async fn list_sops(&self, account_id: Option<Uuid>) -> Result<Vec<Sop>, DatabaseError>;

    /// Active SOPs of an account, strictly by (priority desc, name asc).
    async fn list_active_sops(&self, account_id: Uuid) -> Result<Vec<Sop>, DatabaseError>;

    async fn update_sop(&self, sop: &Sop) -> Result<(), DatabaseError>;

    async fn delete_sop(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &EmailMessage) -> Result<(), DatabaseError>;

    async fn get_email(&self, id: Uuid) -> Result<Option<EmailMessage>, DatabaseError>;

    /// Newest first.
    async fn list_emails(&self, account_id: Option<Uuid>) -> Result<Vec<EmailMessage>, DatabaseError>;

    /// Messages of one provider thread within an account, oldest first.
    async fn list_thread_emails(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<EmailMessage>, DatabaseError>;

    /// Record a label on an email. Returns false if it was already applied.
    async fn add_email_label(&self, email_id: Uuid, label_id: Uuid) -> Result<bool, DatabaseError>;

    async fn list_email_labels(&self, email_id: Uuid) -> Result<Vec<EmailLabel>, DatabaseError>;

    // ── Drafts ──────────────────────────────────────────────────────

    async fn create_draft(&self, draft: &Draft) -> Result<(), DatabaseError>;

    async fn get_draft(&self, id: Uuid) -> Result<Option<Draft>, DatabaseError>;

    async fn list_drafts(&self, filter: ListFilter) -> Result<Vec<Draft>, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Update source email, title, description, priority, status and due date.
    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// The oldest task created from an email, if any.
    async fn find_task_for_email(&self, email_id: Uuid) -> Result<Option<Task>, DatabaseError>;

    async fn list_tasks(&self, filter: ListFilter) -> Result<Vec<Task>, DatabaseError>;

    /// Every task of a thread regardless of status, newest first.
    async fn list_thread_tasks(
        &self,
        account_id: Uuid,
        thread_id: &str,
    ) -> Result<Vec<Task>, DatabaseError>;

    // ── Automation runs ─────────────────────────────────────────────

    async fn create_run(&self, run: &AutomationRun) -> Result<(), DatabaseError>;

    /// Persist state, results, usage and error of an existing run.
    async fn update_run(&self, run: &AutomationRun) -> Result<(), DatabaseError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<AutomationRun>, DatabaseError>;

    /// Newest first. `account_id` matches runs on that account's emails.
    async fn list_runs(&self, filter: ListFilter) -> Result<Vec<AutomationRun>, DatabaseError>;
}
