//! Background jobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work item drained by the automation workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutomationJob {
    /// Classify an email, apply labels, then trigger each applied label.
    ProcessEmail { email_id: Uuid },
    /// Run one label's automation on one email.
    TriggerLabel { label_id: Uuid, email_id: Uuid },
}

impl AutomationJob {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessEmail { .. } => "process_email",
            Self::TriggerLabel { .. } => "trigger_label",
        }
    }

    pub fn email_id(&self) -> Uuid {
        match self {
            Self::ProcessEmail { email_id } | Self::TriggerLabel { email_id, .. } => *email_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_kind_tag() {
        let email_id = Uuid::new_v4();
        let job = AutomationJob::ProcessEmail { email_id };
        let json = serde_json::to_value(job).unwrap();
        assert_eq!(json["kind"], "process_email");
        assert_eq!(job.kind(), "process_email");
        assert_eq!(job.email_id(), email_id);
    }
}
