//! `create_task`: persist one follow-up task per email.
//!
//! Title, priority and due date come from tool arguments when given, and are
//! otherwise derived from the email subject and the action's instructions.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Value, json};
use tracing::debug;

use super::{ActionExecutor, ActionOutcome, ExecutionInput, optional_str, truncate_chars};
use crate::automation::model::ActionFunction;
use crate::error::ExecutorError;
use crate::store::Database;
use crate::tasks::model::{MAX_PRIORITY, MIN_PRIORITY, Task};

const MAX_TITLE_CHARS: usize = 255;

const DEFAULT_INSTRUCTIONS: &str = "Create a task for this email";

static IN_DAYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin\s+(\d{1,3})\s+days?\b").expect("valid regex"));

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("valid regex"));

/// Priority implied by keywords in free text: urgent/priority 5, high 4,
/// medium 3, anything else 1.
pub fn derive_priority(text: &str) -> i32 {
    let lower = text.to_lowercase();
    if lower.contains("urgent") || lower.contains("priority") {
        5
    } else if lower.contains("high") {
        4
    } else if lower.contains("medium") {
        3
    } else {
        MIN_PRIORITY
    }
}

/// Due date implied by a phrase in free text, relative to `now`.
///
/// Recognises an explicit `YYYY-MM-DD`, `in N days`, `tomorrow`, `today`,
/// `this week` and `next week` (both a week out), in that precedence.
pub fn derive_due_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(date) = ISO_DATE
        .captures(text)
        .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
    {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    if let Some(days) = IN_DAYS
        .captures(text)
        .and_then(|c| c[1].parse::<i64>().ok())
    {
        return Some(now + Duration::days(days));
    }

    let lower = text.to_lowercase();
    if lower.contains("tomorrow") {
        Some(now + Duration::days(1))
    } else if lower.contains("today") {
        Some(now)
    } else if lower.contains("this week") || lower.contains("next week") {
        Some(now + Duration::days(7))
    } else {
        None
    }
}

pub struct CreateTaskExecutor {
    store: Arc<dyn Database>,
}

impl CreateTaskExecutor {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }
}

fn priority_param(params: &Value) -> Result<Option<i32>, ExecutorError> {
    match params.get("priority") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|p| Some(p.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32))
            .ok_or_else(|| ExecutorError::InvalidParameters(format!("priority must be an integer, got {n}"))),
        Some(Value::String(s)) => Ok(Some(derive_priority(s))),
        Some(other) => Err(ExecutorError::InvalidParameters(format!(
            "priority must be an integer, got {other}"
        ))),
    }
}

fn due_date_param(params: &Value, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ExecutorError> {
    match optional_str(params, "due_date") {
        None => Ok(None),
        Some(raw) => derive_due_date(raw, now).map(Some).ok_or_else(|| {
            ExecutorError::InvalidParameters(format!("unrecognised due_date '{raw}'"))
        }),
    }
}

#[async_trait]
impl ActionExecutor for CreateTaskExecutor {
    fn function(&self) -> ActionFunction {
        ActionFunction::CreateTask
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short task title (defaults to the email subject)"
                },
                "description": {
                    "type": "string",
                    "description": "What needs to be done"
                },
                "priority": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 5,
                    "description": "1 (lowest) to 5 (most urgent)"
                },
                "due_date": {
                    "type": "string",
                    "description": "YYYY-MM-DD, or a phrase such as 'tomorrow' or 'in 3 days'"
                }
            }
        })
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ActionOutcome, ExecutorError> {
        let email = input.email;

        if let Some(existing) = self.store.find_task_for_email(email.id).await? {
            debug!(task_id = %existing.id, email_id = %email.id, "Task already exists for email");
            return Ok(ActionOutcome::new(
                format!("Task already exists ({})", existing.id),
                json!({"task_id": existing.id, "existing": true}),
            ));
        }

        let instructions = if input.action.instructions.trim().is_empty() {
            DEFAULT_INSTRUCTIONS
        } else {
            input.action.instructions.as_str()
        };
        let now = Utc::now();

        let title = match optional_str(input.params, "title") {
            Some(t) => t.to_string(),
            None if !email.subject.trim().is_empty() => email.subject.trim().to_string(),
            None => format!("Task for email from {}", email.from_address),
        };
        let mut description = match optional_str(input.params, "description") {
            Some(d) => d.to_string(),
            None => {
                let sender = if email.from_name.trim().is_empty() {
                    &email.from_address
                } else {
                    &email.from_name
                };
                format!("Email from {sender}: {}", email.subject)
            }
        };
        if let Some(draft_id) = input.prior.get("draft_id").and_then(Value::as_str) {
            description.push_str(&format!("\n\nDraft reply prepared: {draft_id}"));
        }

        let priority = priority_param(input.params)?.unwrap_or_else(|| derive_priority(instructions));
        let due_at = match due_date_param(input.params, now)? {
            Some(due) => Some(due),
            None => derive_due_date(instructions, now),
        };

        let mut task = Task::new(email.account_id, truncate_chars(&title, MAX_TITLE_CHARS))
            .with_email(email.id, email.thread_id.clone())
            .with_description(description)
            .with_priority(priority);
        if let Some(due) = due_at {
            task = task.with_due_at(due);
        }
        self.store.create_task(&task).await?;

        Ok(ActionOutcome::new(
            format!("Task created ({})", task.id),
            json!({
                "task_id": task.id,
                "title": task.title,
                "priority": task.priority,
                "due_at": task.due_at,
            }),
        ))
    }
}
