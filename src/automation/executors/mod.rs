//! Action executors: one side effect per action function.
//!
//! Every executor receives the configured action, the email, its account,
//! the accumulated results of earlier actions in the same run, and the
//! arguments the LLM supplied (an empty object in legacy mode).

mod create_task;
mod draft_reply;
mod placeholder;

pub use create_task::{CreateTaskExecutor, derive_due_date, derive_priority};
pub use draft_reply::DraftReplyExecutor;
pub use placeholder::PlaceholderExecutor;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::automation::model::{Action, ActionFunction};
use crate::error::ExecutorError;
use crate::llm::TokenUsage;
use crate::mail::model::{Account, EmailMessage};

/// Inputs for a single action execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInput<'a> {
    pub action: &'a Action,
    pub email: &'a EmailMessage,
    pub account: &'a Account,
    /// Data returned by earlier actions in this run, e.g. `draft_id`.
    pub prior: &'a Map<String, Value>,
    /// Tool-call arguments; `{}` in legacy mode.
    pub params: &'a Value,
}

/// Result descriptor of a successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub message: String,
    /// JSON object merged into the run context for later actions.
    pub data: Value,
    /// Tokens spent by LLM calls inside the executor.
    pub usage: TokenUsage,
}

impl ActionOutcome {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Performs the side effect for one action function.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Function this executor handles.
    fn function(&self) -> ActionFunction;

    /// JSON Schema of the arguments the LLM may pass.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ActionOutcome, ExecutorError>;
}

/// Non-empty trimmed string parameter.
pub(crate) fn optional_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Truncate to at most `max` characters.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
