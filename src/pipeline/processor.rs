//! Email processor: classifies a cached email and applies its labels.
//!
//! Flow:
//! 1. Load the email; stop if it already has a task
//! 2. Load the account's active labels
//! 3. Classify (LLM) and drop contradictory labels
//! 4. Record matched labels and make sure a follow-up task exists
//!
//! Running the automation for each applied label is left to the caller.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::classifier::{Classification, EmailClassifier};
use crate::automation::label_validator::{MAX_LABELS, validate_and_filter_labels};
use crate::automation::model::Label;
use crate::error::AutomationError;
use crate::store::Database;
use crate::tasks::ensure_task_for_email;

/// Outcome of processing one email.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmail {
    pub email_id: Uuid,
    /// `None` when the email was skipped because it already had a task.
    pub classification: Option<Classification>,
    /// Labels applied to the email, in classification order.
    pub applied_labels: Vec<Label>,
    pub task_id: Uuid,
    pub task_created: bool,
}

pub struct EmailProcessor {
    store: Arc<dyn Database>,
    classifier: Arc<dyn EmailClassifier>,
}

impl EmailProcessor {
    pub fn new(store: Arc<dyn Database>, classifier: Arc<dyn EmailClassifier>) -> Self {
        Self { store, classifier }
    }

    /// Classify the email, record applied labels and ensure its task.
    ///
    /// An email that already has a task was processed before. It is not
    /// classified again and no labels are reported, so nothing fans out.
    pub async fn process(&self, email_id: Uuid) -> Result<ProcessedEmail, AutomationError> {
        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or_else(|| AutomationError::Configuration(format!("email {email_id} not found")))?;
        if let Some(task) = self.store.find_task_for_email(email.id).await? {
            info!(email_id = %email.id, task_id = %task.id, "Email already has a task, skipping");
            return Ok(ProcessedEmail {
                email_id: email.id,
                classification: None,
                applied_labels: Vec::new(),
                task_id: task.id,
                task_created: false,
            });
        }
        info!(email_id = %email.id, subject = %email.subject, "Processing email");

        let labels = self.store.list_active_labels(email.account_id).await?;
        let classification = self.classifier.classify(&email, &labels).await?;

        let filtered = validate_and_filter_labels(&classification.labels, MAX_LABELS);
        let mut applied_labels = Vec::new();
        for name in &filtered {
            let Some(label) = labels.iter().find(|l| l.name.eq_ignore_ascii_case(name)) else {
                warn!(email_id = %email.id, label = %name, "Classified label is not active for account");
                continue;
            };
            if self.store.add_email_label(email.id, label.id).await? {
                debug!(email_id = %email.id, label = %label.name, "Label applied");
            }
            applied_labels.push(label.clone());
        }

        let (task, task_created) =
            ensure_task_for_email(self.store.as_ref(), &email, &classification).await?;

        info!(
            email_id = %email.id,
            labels = ?applied_labels.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            task_id = %task.id,
            task_created,
            "Email processed"
        );

        Ok(ProcessedEmail {
            email_id: email.id,
            classification: Some(classification),
            applied_labels,
            task_id: task.id,
            task_created,
        })
    }
}
