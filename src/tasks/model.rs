//! Task data model: follow-up work created from emails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest and highest task priority.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 5;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a DB string, defaulting to `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "done" => Self::Done,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// A follow-up task, usually linked to the email it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<Uuid>,
    /// Provider thread id of the source email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 1 (lowest) to 5 (highest).
    pub priority: i32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(account_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            email_id: None,
            thread_id: None,
            title: title.into(),
            description: String::new(),
            priority: MIN_PRIORITY,
            status: TaskStatus::Pending,
            due_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: link to the source email.
    pub fn with_email(mut self, email_id: Uuid, thread_id: Option<String>) -> Self {
        self.email_id = Some(email_id);
        self.thread_id = thread_id;
        self
    }

    /// Builder: set description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set priority, clamped to 1..=5.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
        self
    }

    /// Builder: set due date.
    pub fn with_due_at(mut self, due: DateTime<Utc>) -> Self {
        self.due_at = Some(due);
        self
    }
}
