//! Automation configuration: labels, actions, SOPs and their links.
//!
//! These rows are edited through the admin API only. The automation engine
//! reads them and never writes them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a label decides which actions to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    /// Run every linked action in ascending order.
    #[default]
    Legacy,
    /// Let the LLM choose actions via function calling.
    #[serde(alias = "mcp")]
    Ai,
}

impl AutomationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Ai => "ai",
        }
    }

    /// Parse a DB string, defaulting to `Legacy`. Accepts the historic `mcp`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "ai" | "mcp" => Self::Ai,
            _ => Self::Legacy,
        }
    }
}

impl std::fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registered action functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionFunction {
    DraftReply,
    CreateTask,
    Notify,
    Schedule,
    #[serde(alias = "forward_email")]
    Forward,
    #[serde(alias = "archive_email")]
    Archive,
}

impl ActionFunction {
    pub const ALL: [ActionFunction; 6] = [
        Self::DraftReply,
        Self::CreateTask,
        Self::Notify,
        Self::Schedule,
        Self::Forward,
        Self::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DraftReply => "draft_reply",
            Self::CreateTask => "create_task",
            Self::Notify => "notify",
            Self::Schedule => "schedule",
            Self::Forward => "forward",
            Self::Archive => "archive",
        }
    }

    /// Functions that log and report success without side effects.
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            Self::Notify | Self::Schedule | Self::Forward | Self::Archive
        )
    }

    /// Default tool description offered to the LLM.
    pub fn default_description(&self) -> &'static str {
        match self {
            Self::DraftReply => "Draft a reply to the email for a human to review and send.",
            Self::CreateTask => "Create a follow-up task from the email.",
            Self::Notify => "Notify the team about the email.",
            Self::Schedule => "Propose or book an appointment mentioned in the email.",
            Self::Forward => "Forward the email to another recipient.",
            Self::Archive => "Archive the email.",
        }
    }
}

impl std::str::FromStr for ActionFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "draft_reply" => Ok(Self::DraftReply),
            "create_task" => Ok(Self::CreateTask),
            "notify" => Ok(Self::Notify),
            "schedule" => Ok(Self::Schedule),
            "forward" | "forward_email" => Ok(Self::Forward),
            "archive" | "archive_email" => Ok(Self::Archive),
            other => Err(format!("unknown action function '{other}'")),
        }
    }
}

impl std::fmt::Display for ActionFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classification bucket that may trigger linked actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Unique per account.
    pub name: String,
    /// When this label applies.
    #[serde(default)]
    pub prompt: String,
    /// What to do when it applies.
    #[serde(default)]
    pub instructions: String,
    /// Label-specific procedure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sop_context: Option<String>,
    /// Higher runs first.
    pub priority: i32,
    pub is_active: bool,
    pub mode: AutomationMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Label {
    pub fn new(account_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            prompt: String::new(),
            instructions: String::new(),
            sop_context: None,
            priority: 0,
            is_active: true,
            mode: AutomationMode::Legacy,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Builder: set instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Builder: set label SOP context.
    pub fn with_sop_context(mut self, sop: impl Into<String>) -> Self {
        self.sop_context = Some(sop.into());
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set mode.
    pub fn with_mode(mut self, mode: AutomationMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A configured operation the orchestrator can invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub function: ActionFunction,
    #[serde(default)]
    pub instructions: String,
    /// Overrides the function name as the LLM-facing tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_description: String,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(account_id: Uuid, name: impl Into<String>, function: ActionFunction) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            function,
            instructions: String::new(),
            tool_name: None,
            tool_description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Builder: set instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Builder: set tool name override.
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    /// Builder: set tool description.
    pub fn with_tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description = description.into();
        self
    }

    /// Tool name exposed to the LLM.
    pub fn effective_tool_name(&self) -> &str {
        self.tool_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.function.as_str())
    }

    /// Tool description exposed to the LLM.
    pub fn effective_tool_description(&self) -> &str {
        if self.tool_description.trim().is_empty() {
            self.function.default_description()
        } else {
            &self.tool_description
        }
    }
}

/// Link between a label and one of its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAction {
    pub label_id: Uuid,
    pub action_id: Uuid,
    /// Execution order in legacy mode, a hint in AI mode.
    pub order: i32,
}

/// An action together with its position on a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedAction {
    pub order: i32,
    #[serde(flatten)]
    pub action: Action,
}

/// Standard operating procedure: an account-wide business rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sop {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    /// When the procedure applies.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sop {
    pub fn new(account_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            priority: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A label applied to an email by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLabel {
    pub email_id: Uuid,
    pub label_id: Uuid,
    pub created_at: DateTime<Utc>,
}
