//! Orchestration run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::model::{ActionFunction, AutomationMode};
use crate::error::AutomationError;

/// State of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run recorded, context not yet built.
    Pending,
    /// Executing linked actions in fixed order.
    LegacyExecuting,
    /// Waiting on, or executing, the LLM's chosen actions.
    AiDeciding,
    /// Every chosen action executed.
    Completed,
    /// Aborted; earlier side effects are kept.
    Failed,
}

impl RunState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Pending, LegacyExecuting)
                | (Pending, AiDeciding)
                | (Pending, Failed)
                | (LegacyExecuting, Completed)
                | (LegacyExecuting, Failed)
                | (AiDeciding, Completed)
                | (AiDeciding, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::LegacyExecuting => "legacy_executing",
            Self::AiDeciding => "ai_deciding",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a DB string, defaulting to `Pending`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "legacy_executing" => Self::LegacyExecuting,
            "ai_deciding" => Self::AiDeciding,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Executing state for a mode.
    pub fn executing(mode: AutomationMode) -> Self {
        match mode {
            AutomationMode::Legacy => Self::LegacyExecuting,
            AutomationMode::Ai => Self::AiDeciding,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: Uuid,
    pub action_name: String,
    pub function: ActionFunction,
    /// LLM tool call this result answers (AI mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub success: bool,
    /// Executor-specific descriptor, e.g. `{"draft_id": ...}`.
    pub output: serde_json::Value,
}

/// A persisted orchestration run for one (label, email) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: Uuid,
    pub label_id: Uuid,
    pub email_id: Uuid,
    /// Mode read from the label when the context was built.
    pub mode: AutomationMode,
    pub state: RunState,
    /// Text the LLM returned alongside (or instead of) tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `configuration`, `external_call`, `executor`, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutomationRun {
    pub fn new(label_id: Uuid, email_id: Uuid, mode: AutomationMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            label_id,
            email_id,
            mode,
            state: RunState::Pending,
            reasoning: None,
            results: Vec::new(),
            error: None,
            error_kind: None,
            input_tokens: 0,
            output_tokens: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, new_state: RunState) -> Result<(), AutomationError> {
        if !self.state.can_transition_to(new_state) {
            return Err(AutomationError::InvalidTransition {
                id: self.id,
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }
        self.state = new_state;
        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to `Failed`, recording the error.
    pub fn fail(&mut self, error: &AutomationError) -> Result<(), AutomationError> {
        self.transition_to(RunState::Failed)?;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        Ok(())
    }

    pub fn add_usage(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use RunState::*;
        assert!(Pending.can_transition_to(LegacyExecuting));
        assert!(Pending.can_transition_to(AiDeciding));
        assert!(Pending.can_transition_to(Failed));
        assert!(LegacyExecuting.can_transition_to(Completed));
        assert!(AiDeciding.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!LegacyExecuting.can_transition_to(AiDeciding));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let mut run = AutomationRun::new(Uuid::new_v4(), Uuid::new_v4(), AutomationMode::Ai);
        run.add_usage(u32::MAX - 1, 10);
        run.add_usage(5, 7);
        assert_eq!(run.input_tokens, u32::MAX);
        assert_eq!(run.output_tokens, 17);
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::AiDeciding.is_terminal());
    }

    #[test]
    fn transition_sets_completed_at() {
        let mut run = AutomationRun::new(Uuid::new_v4(), Uuid::new_v4(), AutomationMode::Legacy);
        run.transition_to(RunState::LegacyExecuting).unwrap();
        assert!(run.completed_at.is_none());
        run.transition_to(RunState::Completed).unwrap();
        assert!(run.completed_at.is_some());

        let err = run.transition_to(RunState::Failed).unwrap_err();
        assert_eq!(err.kind(), "state");
    }

    #[test]
    fn fail_records_error_and_kind() {
        let mut run = AutomationRun::new(Uuid::new_v4(), Uuid::new_v4(), AutomationMode::Ai);
        run.transition_to(RunState::AiDeciding).unwrap();
        run.fail(&AutomationError::ExternalCall("timeout".into())).unwrap();
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.error_kind.as_deref(), Some("external_call"));
        assert!(run.error.as_deref().unwrap().contains("timeout"));
    }

    #[test]
    fn state_db_strings() {
        for state in [
            RunState::Pending,
            RunState::LegacyExecuting,
            RunState::AiDeciding,
            RunState::Completed,
            RunState::Failed,
        ] {
            assert_eq!(RunState::from_db(state.as_str()), state);
        }
    }
}
