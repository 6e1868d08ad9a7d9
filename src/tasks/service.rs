//! Task bookkeeping for classified emails.
//!
//! One active task per conversation: while the account has not replied in
//! a thread, a new email folds into the thread's existing task instead of
//! opening another one.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::automation::classifier::Classification;
use crate::automation::executors::derive_due_date;
use crate::error::DatabaseError;
use crate::mail::model::EmailMessage;
use crate::store::Database;
use crate::tasks::model::{MAX_PRIORITY, MIN_PRIORITY, Task, TaskStatus};

/// Upper bound on a consolidated task description, in characters.
const MAX_DESCRIPTION_CHARS: usize = 5000;

/// Make sure the email has a task reflecting its classification.
///
/// Consolidates into the thread's active task when there is one and the
/// account has not replied in the thread. Otherwise creates a task, or
/// escalates the email's own: priority only rises and the due date only
/// moves earlier. Returns the task and whether it was created.
pub async fn ensure_task_for_email(
    store: &dyn Database,
    email: &EmailMessage,
    classification: &Classification,
) -> Result<(Task, bool), DatabaseError> {
    let now = Utc::now();
    let due_at = classification
        .due_date
        .as_deref()
        .and_then(|d| derive_due_date(d, now));

    if let Some(thread_id) = email.thread_id.as_deref()
        && let Some(task) = consolidate_thread(store, email, thread_id, classification, due_at).await?
    {
        return Ok((task, false));
    }

    if let Some(mut task) = store.find_task_for_email(email.id).await? {
        let mut changed = false;
        if classification.priority > task.priority {
            task.priority = classification.priority;
            changed = true;
        }
        if let Some(due) = due_at
            && task.due_at.is_none_or(|current| due < current)
        {
            task.due_at = Some(due);
            changed = true;
        }
        if changed {
            task.updated_at = now;
            store.update_task(&task).await?;
            debug!(task_id = %task.id, priority = task.priority, "Task updated from classification");
        }
        return Ok((task, false));
    }

    let mut task = Task::new(email.account_id, classification.task_title.clone())
        .with_email(email.id, email.thread_id.clone())
        .with_description(classification.task_description.clone())
        .with_priority(classification.priority);
    if let Some(due) = due_at {
        task = task.with_due_at(due);
    }
    store.create_task(&task).await?;
    Ok((task, true))
}

/// Merge the thread's tasks into one and point it at `email`.
///
/// Returns `None` when the account already replied in the thread or the
/// thread has no pending or in-progress task.
async fn consolidate_thread(
    store: &dyn Database,
    email: &EmailMessage,
    thread_id: &str,
    classification: &Classification,
    due_at: Option<DateTime<Utc>>,
) -> Result<Option<Task>, DatabaseError> {
    let account = store
        .get_account(email.account_id)
        .await?
        .ok_or_else(|| DatabaseError::not_found("account", email.account_id))?;
    let thread_emails = store.list_thread_emails(email.account_id, thread_id).await?;
    let replied = thread_emails
        .iter()
        .any(|m| m.from_address.eq_ignore_ascii_case(&account.email));
    if replied {
        return Ok(None);
    }

    let thread_tasks = store.list_thread_tasks(email.account_id, thread_id).await?;
    let active: Vec<&Task> = thread_tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress))
        .collect();
    let Some(keep) = active
        .iter()
        .find(|t| t.status == TaskStatus::InProgress)
        .or_else(|| active.first())
    else {
        return Ok(None);
    };
    let mut task = (*keep).clone();

    let priority = active
        .iter()
        .map(|t| t.priority)
        .chain([classification.priority])
        .max()
        .unwrap_or(classification.priority);
    let due = active.iter().filter_map(|t| t.due_at).chain(due_at).min();

    let stale: Vec<&Task> = thread_tasks.iter().filter(|t| t.id != task.id).collect();
    let mut description = classification.task_description.clone();
    if !stale.is_empty() {
        if thread_emails.len() > 1 {
            description.push_str(&format!(
                "\n\n[Part of conversation thread with {} message(s). Consolidated from {} previous task(s).]",
                thread_emails.len(),
                stale.len()
            ));
        } else {
            description.push_str(&format!(
                "\n\n[Consolidated from {} previous task(s).]",
                stale.len()
            ));
        }
    }

    task.email_id = Some(email.id);
    task.title = classification.task_title.clone();
    task.description = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
    task.priority = priority.clamp(MIN_PRIORITY, MAX_PRIORITY);
    task.due_at = due;
    if task.status != TaskStatus::InProgress {
        task.status = TaskStatus::Pending;
    }
    task.updated_at = Utc::now();
    store.update_task(&task).await?;

    for old in &stale {
        store.delete_task(old.id).await?;
    }
    info!(
        task_id = %task.id,
        thread_id,
        merged = stale.len(),
        priority = task.priority,
        "Thread tasks consolidated"
    );
    Ok(Some(task))
}
