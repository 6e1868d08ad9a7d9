//! Orchestrator: runs a label's automation on one email.
//!
//! A run moves `pending -> legacy_executing | ai_deciding -> completed | failed`
//! and is persisted on every transition. Legacy mode executes the linked
//! actions by ascending order; AI mode lets the LLM choose tool calls and
//! executes them in the returned order. Any failure stops the run; side
//! effects of actions that already ran are kept.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::automation::context_builder::{ActionContext, ContextBuilder};
use crate::automation::executors::ExecutionInput;
use crate::automation::model::{Action, AutomationMode};
use crate::automation::registry::ActionRegistry;
use crate::automation::run::{ActionResult, AutomationRun, RunState};
use crate::error::AutomationError;
use crate::llm::{ChatMessage, LlmProvider, Reasoning, ReasoningContext, RespondResult, ToolCall};
use crate::store::Database;

const AI_TEMPERATURE: f32 = 0.3;

pub struct Orchestrator {
    store: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ActionRegistry>,
    builder: ContextBuilder,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ActionRegistry>,
    ) -> Self {
        let builder = ContextBuilder::new(store.clone(), registry.clone());
        Self {
            store,
            llm,
            registry,
            builder,
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Run the label's automation on the email.
    ///
    /// Returns the persisted run, which may be `failed`. An `Err` means no
    /// run could be recorded: the label or email does not exist, or the
    /// store is unavailable.
    pub async fn run(&self, label_id: Uuid, email_id: Uuid) -> Result<AutomationRun, AutomationError> {
        let ctx = match self.builder.build(label_id, email_id).await {
            Ok(ctx) => ctx,
            Err(e) => return self.record_rejected(label_id, email_id, e).await,
        };

        let mut run = AutomationRun::new(ctx.label.id, ctx.email.id, ctx.mode);
        self.store.create_run(&run).await?;
        run.transition_to(RunState::executing(ctx.mode))?;
        self.store.update_run(&run).await?;

        info!(
            run_id = %run.id,
            label = %ctx.label.name,
            email_id = %ctx.email.id,
            mode = %ctx.mode,
            "Automation run started"
        );

        let outcome = match ctx.mode {
            AutomationMode::Legacy => self.execute_legacy(&ctx, &mut run).await,
            AutomationMode::Ai => self.execute_ai(&ctx, &mut run).await,
        };

        match outcome {
            Ok(()) => {
                run.transition_to(RunState::Completed)?;
                info!(
                    run_id = %run.id,
                    actions = run.results.len(),
                    input_tokens = run.input_tokens,
                    output_tokens = run.output_tokens,
                    "Automation run completed"
                );
            }
            Err(e) => {
                error!(run_id = %run.id, kind = e.kind(), error = %e, "Automation run failed");
                run.fail(&e)?;
            }
        }
        self.store.update_run(&run).await?;
        Ok(run)
    }

    /// Persist a failed run for a context that could not be built, when the
    /// label and email exist to attach it to.
    async fn record_rejected(
        &self,
        label_id: Uuid,
        email_id: Uuid,
        cause: AutomationError,
    ) -> Result<AutomationRun, AutomationError> {
        let label = self.store.get_label(label_id).await?;
        let email = self.store.get_email(email_id).await?;
        let Some((label, _)) = label.zip(email) else {
            warn!(%label_id, %email_id, error = %cause, "Automation rejected");
            return Err(cause);
        };

        let mut run = AutomationRun::new(label.id, email_id, label.mode);
        run.fail(&cause)?;
        self.store.create_run(&run).await?;
        warn!(run_id = %run.id, label = %label.name, error = %cause, "Automation rejected");
        Ok(run)
    }

    async fn execute_legacy(&self, ctx: &ActionContext, run: &mut AutomationRun) -> Result<(), AutomationError> {
        let mut prior = Map::new();
        let params = json!({});
        for linked in &ctx.linked_actions {
            self.execute_action(ctx, &linked.action, &params, None, &mut prior, run)
                .await?;
        }
        Ok(())
    }

    async fn execute_ai(&self, ctx: &ActionContext, run: &mut AutomationRun) -> Result<(), AutomationError> {
        let reasoning = Reasoning::new(self.llm.clone())
            .with_system_prompt(ctx.system_prompt())
            .with_temperature(AI_TEMPERATURE);
        let request = ReasoningContext::new()
            .with_messages(vec![ChatMessage::user(ctx.user_prompt())])
            .with_tools(ctx.tools.clone())
            .with_metadata("label_id", ctx.label.id.to_string())
            .with_metadata("email_id", ctx.email.id.to_string());

        let output = reasoning.respond_with_tools(&request).await?;
        run.add_usage(output.usage.input_tokens, output.usage.output_tokens);

        let (tool_calls, content) = match output.result {
            RespondResult::Text(text) => (Vec::new(), Some(text)),
            RespondResult::ToolCalls {
                tool_calls,
                content,
            } => (tool_calls, content),
        };
        run.reasoning = content.filter(|c| !c.trim().is_empty());
        self.store.update_run(run).await?;

        // Resolve every call before executing any so an unknown tool fails
        // the run without side effects.
        let planned = tool_calls
            .iter()
            .map(|call| {
                ctx.action_for_tool(&call.name)
                    .map(|action| (call, action))
                    .ok_or_else(|| {
                        AutomationError::ExternalCall(format!(
                            "model called unknown tool '{}'",
                            call.name
                        ))
                    })
            })
            .collect::<Result<Vec<(&ToolCall, &Action)>, _>>()?;

        info!(
            run_id = %run.id,
            tools = ?planned.iter().map(|(c, _)| c.name.as_str()).collect::<Vec<_>>(),
            "Model selected actions"
        );

        let mut prior = Map::new();
        for (call, action) in planned {
            let params = if call.arguments.is_object() {
                call.arguments.clone()
            } else {
                json!({})
            };
            self.execute_action(ctx, action, &params, Some(call.id.clone()), &mut prior, run)
                .await?;
        }
        Ok(())
    }

    async fn execute_action(
        &self,
        ctx: &ActionContext,
        action: &Action,
        params: &Value,
        tool_call_id: Option<String>,
        prior: &mut Map<String, Value>,
        run: &mut AutomationRun,
    ) -> Result<(), AutomationError> {
        let executor = self.registry.get(action.function).ok_or_else(|| {
            AutomationError::Configuration(format!(
                "no executor registered for function '{}'",
                action.function
            ))
        })?;

        let input = ExecutionInput {
            action,
            email: &ctx.email,
            account: &ctx.account,
            prior,
            params,
        };
        let result = executor.execute(input).await;
        match result {
            Ok(outcome) => {
                info!(
                    run_id = %run.id,
                    action = %action.name,
                    function = %action.function,
                    "{}",
                    outcome.message
                );
                run.add_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
                if let Value::Object(data) = &outcome.data {
                    for (key, value) in data {
                        prior.insert(key.clone(), value.clone());
                    }
                }
                run.results.push(ActionResult {
                    action_id: action.id,
                    action_name: action.name.clone(),
                    function: action.function,
                    tool_call_id,
                    success: true,
                    output: json!({"message": outcome.message, "data": outcome.data}),
                });
                Ok(())
            }
            Err(source) => {
                run.results.push(ActionResult {
                    action_id: action.id,
                    action_name: action.name.clone(),
                    function: action.function,
                    tool_call_id,
                    success: false,
                    output: json!({"error": source.to_string()}),
                });
                Err(AutomationError::Executor {
                    action: action.name.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::automation::model::{ActionFunction, Label};
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, ToolCompletionRequest,
        ToolCompletionResponse,
    };
    use crate::mail::model::{Account, EmailMessage, MailProvider};
    use crate::store::{LibSqlBackend, ListFilter};

    /// Returns a fixed draft body and a fixed set of tool calls.
    #[derive(Default)]
    struct ScriptedLlm {
        draft_body: String,
        tool_calls: Vec<ToolCall>,
        content: Option<String>,
        fail_tools: bool,
        tool_requests: Mutex<Vec<ToolCompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.draft_body.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            self.tool_requests.lock().unwrap().push(request);
            if self.fail_tools {
                return Err(LlmError::RequestFailed {
                    provider: "scripted".into(),
                    reason: "connection refused".into(),
                });
            }
            Ok(ToolCompletionResponse {
                content: self.content.clone(),
                tool_calls: self.tool_calls.clone(),
                input_tokens: 100,
                output_tokens: 20,
                finish_reason: FinishReason::ToolUse,
                response_id: None,
            })
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    struct Fixture {
        store: Arc<LibSqlBackend>,
        llm: Arc<ScriptedLlm>,
        orchestrator: Orchestrator,
        account: Account,
        email: EmailMessage,
    }

    async fn fixture(llm: ScriptedLlm) -> Fixture {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(llm);
        let registry = Arc::new(ActionRegistry::standard(store.clone(), llm.clone()));
        let orchestrator = Orchestrator::new(store.clone(), llm.clone(), registry);
        let account = Account::new(MailProvider::Gmail, "ops@example.com");
        store.create_account(&account).await.unwrap();
        let email = EmailMessage::new(account.id, "m-1", "jo@customer.com", "Car park quote")
            .with_body("<p>Can you quote 40 bays?</p>");
        store.insert_email(&email).await.unwrap();
        Fixture {
            store,
            llm,
            orchestrator,
            account,
            email,
        }
    }

    impl Fixture {
        async fn action(&self, name: &str, function: ActionFunction) -> Action {
            let action = Action::new(self.account.id, name, function);
            self.store.create_action(&action).await.unwrap();
            action
        }

        async fn label(&self, mode: AutomationMode, actions: &[(&Action, i32)]) -> Label {
            let label = Label::new(self.account.id, "Quote").with_mode(mode);
            self.store.create_label(&label).await.unwrap();
            for (action, order) in actions {
                self.store.link_action(label.id, action.id, *order).await.unwrap();
            }
            label
        }

        async fn side_effects(&self) -> (usize, usize) {
            let drafts = self.store.list_drafts(ListFilter::default()).await.unwrap();
            let tasks = self.store.list_tasks(ListFilter::default()).await.unwrap();
            (drafts.len(), tasks.len())
        }
    }

    fn functions(run: &AutomationRun) -> Vec<ActionFunction> {
        run.results.iter().map(|r| r.function).collect()
    }

    #[tokio::test]
    async fn legacy_executes_linked_actions_in_order() {
        let f = fixture(ScriptedLlm {
            draft_body: "<p>Happy to help.</p>".into(),
            ..Default::default()
        })
        .await;
        let task = f.action("Log task", ActionFunction::CreateTask).await;
        let reply = f.action("Reply", ActionFunction::DraftReply).await;
        let label = f.label(AutomationMode::Legacy, &[(&task, 2), (&reply, 1)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(functions(&run), vec![ActionFunction::DraftReply, ActionFunction::CreateTask]);
        assert!(run.results.iter().all(|r| r.success));
        assert_eq!((run.input_tokens, run.output_tokens), (10, 5));
        assert!(run.completed_at.is_some());

        let draft_id = run.results[0].output["data"]["draft_id"].as_str().unwrap().to_string();
        let stored_task = f.store.find_task_for_email(f.email.id).await.unwrap().unwrap();
        assert!(stored_task.description.contains(&draft_id));

        assert_eq!(f.store.get_run(run.id).await.unwrap().unwrap(), run);
        assert!(f.llm.tool_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ai_mode_with_no_tool_calls_completes_without_side_effects() {
        let f = fixture(ScriptedLlm {
            content: Some("Nothing to do for a thank-you note.".into()),
            ..Default::default()
        })
        .await;
        let reply = f.action("Reply", ActionFunction::DraftReply).await;
        let label = f.label(AutomationMode::Ai, &[(&reply, 1)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert!(run.results.is_empty());
        assert_eq!(run.reasoning.as_deref(), Some("Nothing to do for a thank-you note."));
        assert_eq!(f.side_effects().await, (0, 0));

        let requests = f.llm.tool_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools[0].name, "draft_reply");
        assert_eq!(requests[0].temperature, Some(AI_TEMPERATURE));
    }

    #[tokio::test]
    async fn ai_mode_executes_calls_in_returned_order_with_arguments() {
        let f = fixture(ScriptedLlm {
            draft_body: "<p>Quote attached.</p>".into(),
            tool_calls: vec![
                call("c1", "create_task", json!({"title": "Quote 40 bays", "priority": 4})),
                call("c2", "draft_reply", json!({})),
            ],
            ..Default::default()
        })
        .await;
        let reply = f.action("Reply", ActionFunction::DraftReply).await;
        let task = f.action("Task", ActionFunction::CreateTask).await;
        let label = f.label(AutomationMode::Ai, &[(&reply, 1), (&task, 2)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(functions(&run), vec![ActionFunction::CreateTask, ActionFunction::DraftReply]);
        assert_eq!(run.results[0].tool_call_id.as_deref(), Some("c1"));
        assert_eq!((run.input_tokens, run.output_tokens), (110, 25));

        let stored_task = f.store.find_task_for_email(f.email.id).await.unwrap().unwrap();
        assert_eq!(stored_task.title, "Quote 40 bays");
        assert_eq!(stored_task.priority, 4);
        assert_eq!(f.side_effects().await, (1, 1));
    }

    #[tokio::test]
    async fn ai_mode_without_linked_actions_offers_all_account_actions() {
        let f = fixture(ScriptedLlm {
            tool_calls: vec![call("c1", "archive", json!({"reason": "newsletter"}))],
            ..Default::default()
        })
        .await;
        f.action("Archive", ActionFunction::Archive).await;
        let label = f.label(AutomationMode::Ai, &[]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(functions(&run), vec![ActionFunction::Archive]);
    }

    #[tokio::test]
    async fn llm_failure_fails_run_before_any_action() {
        let f = fixture(ScriptedLlm {
            fail_tools: true,
            ..Default::default()
        })
        .await;
        let task = f.action("Task", ActionFunction::CreateTask).await;
        let label = f.label(AutomationMode::Ai, &[(&task, 1)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("external_call"));
        assert!(run.error.as_deref().unwrap().contains("connection refused"));
        assert!(run.results.is_empty());
        assert_eq!(f.side_effects().await, (0, 0));
        assert_eq!(f.store.get_run(run.id).await.unwrap().unwrap().state, RunState::Failed);
    }

    #[tokio::test]
    async fn unknown_tool_fails_run_without_side_effects() {
        let f = fixture(ScriptedLlm {
            tool_calls: vec![
                call("c1", "create_task", json!({})),
                call("c2", "delete_mailbox", json!({})),
            ],
            ..Default::default()
        })
        .await;
        let task = f.action("Task", ActionFunction::CreateTask).await;
        let label = f.label(AutomationMode::Ai, &[(&task, 1)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("external_call"));
        assert!(run.error.as_deref().unwrap().contains("delete_mailbox"));
        assert_eq!(f.side_effects().await, (0, 0));
    }

    #[tokio::test]
    async fn executor_failure_skips_remaining_actions_and_keeps_earlier_effects() {
        // An empty model reply makes draft_reply fail.
        let f = fixture(ScriptedLlm::default()).await;
        let task = f.action("Task", ActionFunction::CreateTask).await;
        let reply = f.action("Reply", ActionFunction::DraftReply).await;
        let notify = f.action("Notify", ActionFunction::Notify).await;
        let label = f
            .label(AutomationMode::Legacy, &[(&task, 1), (&reply, 2), (&notify, 3)])
            .await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("executor"));
        assert_eq!(functions(&run), vec![ActionFunction::CreateTask, ActionFunction::DraftReply]);
        assert!(run.results[0].success);
        assert!(!run.results[1].success);
        assert_eq!(f.side_effects().await, (0, 1));
    }

    #[tokio::test]
    async fn placeholder_actions_mutate_nothing() {
        let f = fixture(ScriptedLlm::default()).await;
        let archive = f.action("Archive", ActionFunction::Archive).await;
        let schedule = f.action("Schedule", ActionFunction::Schedule).await;
        let label = f.label(AutomationMode::Legacy, &[(&archive, 1), (&schedule, 2)]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert!(run.results.iter().all(|r| r.output["data"]["placeholder"] == true));
        assert_eq!(f.side_effects().await, (0, 0));
    }

    #[tokio::test]
    async fn configuration_failures() {
        let f = fixture(ScriptedLlm::default()).await;
        let label = f.label(AutomationMode::Legacy, &[]).await;

        let run = f.orchestrator.run(label.id, f.email.id).await.unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("configuration"));
        assert_eq!(f.store.list_runs(ListFilter::default()).await.unwrap().len(), 1);

        let err = f.orchestrator.run(label.id, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert_eq!(f.store.list_runs(ListFilter::default()).await.unwrap().len(), 1);
    }
}
