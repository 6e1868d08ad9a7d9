//! `draft_reply`: generate a reply with the LLM and store it as a draft.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{ActionExecutor, ActionOutcome, ExecutionInput, optional_str, truncate_chars};
use crate::automation::model::ActionFunction;
use crate::error::{ExecutorError, LlmError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, TokenUsage};
use crate::mail::model::Draft;
use crate::store::Database;

const SYSTEM_PROMPT: &str = "You respond as a polite, concise operations assistant. \
Write only the body of the reply as simple HTML paragraphs, without a subject line \
or signature. Use Australian English spelling.";

/// Longest email body passed to the model.
const MAX_BODY_CHARS: usize = 4000;

const DRAFT_TEMPERATURE: f32 = 0.4;

pub struct DraftReplyExecutor {
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
}

impl DraftReplyExecutor {
    pub fn new(store: Arc<dyn Database>, llm: Arc<dyn LlmProvider>) -> Self {
        Self { store, llm }
    }

    fn build_prompt(input: &ExecutionInput<'_>) -> String {
        let mut instructions = if input.action.instructions.trim().is_empty() {
            input.action.name.clone()
        } else {
            input.action.instructions.clone()
        };
        if let Some(extra) = optional_str(input.params, "instructions") {
            instructions.push_str("\n\nAdditional instructions: ");
            instructions.push_str(extra);
        }
        if !input.account.writing_style.trim().is_empty() {
            instructions.push_str("\n\nWriting style: ");
            instructions.push_str(input.account.writing_style.trim());
        }

        let email = input.email;
        format!(
            "{instructions}\n\nContext:\nSubject: {}\nFrom: {}\nBody:\n{}",
            email.subject,
            email.sender_display(),
            truncate_chars(&email.body_html, MAX_BODY_CHARS),
        )
    }
}

#[async_trait]
impl ActionExecutor for DraftReplyExecutor {
    fn function(&self) -> ActionFunction {
        ActionFunction::DraftReply
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "instructions": {
                    "type": "string",
                    "description": "Extra guidance for this particular reply, e.g. points to cover"
                }
            }
        })
    }

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ActionOutcome, ExecutorError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::build_prompt(&input)),
        ])
        .with_temperature(DRAFT_TEMPERATURE);

        let response = self.llm.complete(request).await?;
        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        let mut body = response.content.trim().to_string();
        if body.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty draft body".to_string(),
            }
            .into());
        }
        if !input.account.signature_html.trim().is_empty() {
            body.push_str("\n\n");
            body.push_str(&input.account.signature_html);
        }

        let draft = Draft::reply_to(input.email, body);
        self.store.create_draft(&draft).await?;
        debug!(draft_id = %draft.id, email_id = %input.email.id, "Draft reply stored");

        Ok(ActionOutcome::new(
            format!("Draft reply created ({})", draft.id),
            json!({
                "draft_id": draft.id,
                "subject": draft.subject,
            }),
        )
        .with_usage(usage))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rust_decimal::Decimal;
    use serde_json::Map;

    use super::*;
    use crate::automation::model::Action;
    use crate::llm::{CompletionResponse, FinishReason, ToolCompletionRequest, ToolCompletionResponse};
    use crate::mail::model::{Account, EmailMessage, MailProvider};
    use crate::store::{LibSqlBackend, ListFilter};

    struct EchoLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn model_name(&self) -> &str {
            "echo"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 40,
                output_tokens: 20,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            unimplemented!("draft replies never use tools")
        }
    }

    async fn fixture() -> (Arc<LibSqlBackend>, Account, EmailMessage) {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let account = Account::new(MailProvider::Gmail, "ops@example.com")
            .with_writing_style("Warm and brief")
            .with_signature("<p>Cheers, Ops</p>");
        store.create_account(&account).await.unwrap();
        let email = EmailMessage::new(account.id, "m-1", "jo@customer.com", "Quote for line marking")
            .with_body("<p>How much for a car park?</p>");
        store.insert_email(&email).await.unwrap();
        (store, account, email)
    }

    #[tokio::test]
    async fn creates_draft_addressed_to_sender() {
        let (store, account, email) = fixture().await;
        let llm = Arc::new(EchoLlm {
            reply: "<p>Thanks for reaching out.</p>".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let executor = DraftReplyExecutor::new(store.clone(), llm.clone());
        let action = Action::new(account.id, "Reply", ActionFunction::DraftReply)
            .with_instructions("Offer a site visit");
        let prior = Map::new();
        let params = json!({"instructions": "Mention weekend availability"});

        let outcome = executor
            .execute(ExecutionInput {
                action: &action,
                email: &email,
                account: &account,
                prior: &prior,
                params: &params,
            })
            .await
            .unwrap();

        let drafts = store.list_drafts(ListFilter::email(email.id)).await.unwrap();
        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(outcome.data["draft_id"], json!(draft.id));
        assert_eq!(draft.subject, "Re: Quote for line marking");
        assert_eq!(draft.to_addresses, vec!["jo@customer.com".to_string()]);
        assert!(draft.body_html.starts_with("<p>Thanks for reaching out.</p>"));
        assert!(draft.body_html.ends_with("<p>Cheers, Ops</p>"));
        assert_eq!(outcome.usage.total(), 60);

        let prompt = llm.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Offer a site visit"));
        assert!(prompt.contains("Mention weekend availability"));
        assert!(prompt.contains("Writing style: Warm and brief"));
        assert!(prompt.contains("How much for a car park?"));
    }

    #[tokio::test]
    async fn empty_model_output_is_an_error() {
        let (store, account, email) = fixture().await;
        let llm = Arc::new(EchoLlm {
            reply: "   ".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let executor = DraftReplyExecutor::new(store.clone(), llm);
        let action = Action::new(account.id, "Reply", ActionFunction::DraftReply);
        let prior = Map::new();
        let params = json!({});

        let err = executor
            .execute(ExecutionInput {
                action: &action,
                email: &email,
                account: &account,
                prior: &prior,
                params: &params,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Llm(LlmError::InvalidResponse { .. })));
        assert!(store.list_drafts(ListFilter::default()).await.unwrap().is_empty());
    }
}
