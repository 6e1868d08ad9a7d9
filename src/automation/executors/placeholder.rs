//! Executors for functions without a backing integration yet.
//!
//! `notify`, `schedule`, `forward` and `archive` log the request and report
//! success with `placeholder: true`. They never touch the store.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{ActionExecutor, ActionOutcome, ExecutionInput, optional_str};
use crate::automation::model::ActionFunction;
use crate::error::ExecutorError;

pub struct PlaceholderExecutor {
    function: ActionFunction,
}

impl PlaceholderExecutor {
    pub fn new(function: ActionFunction) -> Self {
        Self { function }
    }
}

#[async_trait]
impl ActionExecutor for PlaceholderExecutor {
    fn function(&self) -> ActionFunction {
        self.function
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why this action should run for the email"
                }
            }
        })
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ActionOutcome, ExecutorError> {
        let reason = optional_str(input.params, "reason");
        info!(
            action = %input.action.name,
            function = %self.function,
            email_id = %input.email.id,
            instructions = %input.action.instructions,
            reason = reason.unwrap_or(""),
            prior_keys = ?input.prior.keys().collect::<Vec<_>>(),
            "Placeholder action triggered, nothing executed"
        );
        Ok(ActionOutcome::new(
            format!("{} logged (not implemented)", self.function),
            json!({
                "placeholder": true,
                "action": input.action.name,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::automation::model::Action;
    use crate::mail::model::{Account, EmailMessage, MailProvider};

    #[tokio::test]
    async fn reports_success_without_side_effects() {
        let account = Account::new(MailProvider::Gmail, "ops@example.com");
        let email = EmailMessage::new(account.id, "m-1", "jo@example.com", "Hi");
        let action = Action::new(account.id, "Archive it", ActionFunction::Archive);
        let prior = Map::new();
        let params = json!({"reason": "newsletter"});

        let outcome = PlaceholderExecutor::new(ActionFunction::Archive)
            .execute(ExecutionInput {
                action: &action,
                email: &email,
                account: &account,
                prior: &prior,
                params: &params,
            })
            .await
            .unwrap();

        assert_eq!(outcome.data["placeholder"], true);
        assert_eq!(outcome.data["action"], "Archive it");
        assert!(outcome.message.contains("archive"));
        assert_eq!(outcome.usage.total(), 0);
    }
}
