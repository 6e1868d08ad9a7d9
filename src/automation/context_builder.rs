//! Assembles everything the orchestrator needs for one label on one email.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::automation::executors::truncate_chars;
use crate::automation::model::{Action, AutomationMode, Label, LinkedAction, Sop};
use crate::automation::registry::ActionRegistry;
use crate::error::AutomationError;
use crate::llm::ToolDefinition;
use crate::mail::model::{Account, EmailMessage};
use crate::store::Database;

/// Longest body excerpt placed in prompts.
pub const BODY_PREVIEW_CHARS: usize = 1000;

/// How many other active labels are shown for context.
const OTHER_LABELS_LIMIT: usize = 5;

/// Prompt-facing view of the email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailSummary {
    pub subject: String,
    pub from_address: String,
    pub from_name: String,
    pub to_addresses: Vec<String>,
    pub body_preview: String,
}

impl EmailSummary {
    fn from_email(email: &EmailMessage) -> Self {
        let subject = if email.subject.trim().is_empty() {
            "(No subject)".to_string()
        } else {
            email.subject.clone()
        };
        let from_name = if email.from_name.trim().is_empty() {
            email.from_address.clone()
        } else {
            email.from_name.clone()
        };
        Self {
            subject,
            from_address: email.from_address.clone(),
            from_name,
            to_addresses: email.to_addresses.clone(),
            body_preview: truncate_chars(&email.body_html, BODY_PREVIEW_CHARS),
        }
    }
}

/// Context bundle for one orchestration run.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub label: Label,
    /// Read from the label once, when the context is built.
    pub mode: AutomationMode,
    pub email: EmailMessage,
    pub account: Account,
    pub summary: EmailSummary,
    /// Actions linked to the label, by ascending order.
    pub linked_actions: Vec<LinkedAction>,
    /// Actions the run may execute: the linked ones, or in AI mode every
    /// account action when the label has none linked.
    pub available_actions: Vec<Action>,
    /// Active SOPs by priority desc, name asc.
    pub sops: Vec<Sop>,
    /// Other active labels of the account, highest priority first.
    pub other_labels: Vec<Label>,
    pub tools: Vec<ToolDefinition>,
}

impl ActionContext {
    pub fn writing_style(&self) -> &str {
        self.account.writing_style.trim()
    }

    /// System prompt for AI mode.
    pub fn system_prompt(&self) -> String {
        let label = &self.label;
        let mut out = String::new();

        out.push_str(
            "You are an email action orchestrator for an Australian operations team.\n\n\
             Decide which of the available tools to call for the email below, and in what order. \
             Base the decision on the email content first, then on the label's instructions and \
             the standard operating procedures.\n\n",
        );
        let _ = writeln!(out, "CURRENT LABEL: {} (Priority: {})\n", label.name, label.priority);

        out.push_str("WHEN THIS LABEL APPLIES:\n");
        out.push_str(or_default(&label.prompt, "No specific criteria defined"));
        out.push_str("\n\nWHAT TO DO:\n");
        out.push_str(or_default(&label.instructions, "No specific instructions defined"));
        out.push_str("\n\n");

        if let Some(sop) = label.sop_context.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str("LABEL PROCEDURE:\n");
            out.push_str(sop.trim());
            out.push_str("\n\n");
        }

        out.push_str("STANDARD OPERATING PROCEDURES:\n");
        out.push_str(&format_sops(&self.sops));
        out.push_str("\n\nOTHER ACTIVE LABELS (for context):\n");
        out.push_str(&format_other_labels(&self.other_labels));
        out.push_str("\n\nLABEL-LINKED ACTIONS (preferred):\n");
        if self.linked_actions.is_empty() {
            out.push_str("None (choose from all available actions)");
        } else {
            let linked: Vec<Action> = self.linked_actions.iter().map(|l| l.action.clone()).collect();
            out.push_str(&format_actions(&linked));
        }
        out.push_str("\n\nALL AVAILABLE ACTIONS:\n");
        out.push_str(&format_actions(&self.available_actions));
        out.push_str("\n\nACCOUNT SETTINGS:\nWriting style: ");
        out.push_str(or_default(self.writing_style(), "Not specified"));

        out.push_str(
            "\n\nRULES:\n\
             1. Call only the tools that the email actually needs; calling none is acceptable.\n\
             2. Tool calls are executed in the order you return them, so put dependencies first \
             (for example draft a reply before creating a task that refers to it).\n\
             3. Prefer label-linked actions when they fit.\n\
             4. Use Australian English spelling.\n\
             5. Briefly explain your reasoning in the message content.",
        );
        out
    }

    /// User prompt carrying the email.
    pub fn user_prompt(&self) -> String {
        let email = &self.summary;
        let to = if email.to_addresses.is_empty() {
            "N/A".to_string()
        } else {
            email.to_addresses.join(", ")
        };
        format!(
            "Email to process:\n\nSubject: {}\nFrom: {} ({})\nTo: {}\n\nBody:\n{}\n\n\
             Analyse this email and call the tools to execute, in order.",
            email.subject, email.from_name, email.from_address, to, email.body_preview
        )
    }

    /// Available action whose tool name matches.
    pub fn action_for_tool(&self, tool_name: &str) -> Option<&Action> {
        self.available_actions
            .iter()
            .find(|a| a.effective_tool_name() == tool_name)
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { default } else { trimmed }
}

fn format_sops(sops: &[Sop]) -> String {
    if sops.is_empty() {
        return "None.".to_string();
    }
    let mut lines = Vec::new();
    for sop in sops {
        lines.push(format!("**{}** (Priority: {})", sop.name, sop.priority));
        if !sop.description.trim().is_empty() {
            lines.push(format!("  When: {}", sop.description.trim()));
        }
        if !sop.instructions.trim().is_empty() {
            lines.push(format!("  Instructions: {}", sop.instructions.trim()));
        }
    }
    lines.join("\n")
}

fn format_other_labels(labels: &[Label]) -> String {
    if labels.is_empty() {
        return "No other active labels.".to_string();
    }
    let mut lines = Vec::new();
    for label in labels {
        lines.push(format!("**{}** (Priority: {})", label.name, label.priority));
        if !label.prompt.trim().is_empty() {
            lines.push(format!("  When: {}", label.prompt.trim()));
        }
    }
    lines.join("\n")
}

fn format_actions(actions: &[Action]) -> String {
    if actions.is_empty() {
        return "No actions available.".to_string();
    }
    let mut lines = Vec::new();
    for action in actions {
        let description = if !action.tool_description.trim().is_empty() {
            action.tool_description.trim()
        } else if !action.instructions.trim().is_empty() {
            action.instructions.trim()
        } else {
            action.name.as_str()
        };
        lines.push(format!("- **{}**: {}", action.effective_tool_name(), description));
        if !action.instructions.trim().is_empty() {
            lines.push(format!("  Instructions: {}", action.instructions.trim()));
        }
    }
    lines.join("\n")
}

/// Loads labels, actions, SOPs and the email into an [`ActionContext`].
pub struct ContextBuilder {
    store: Arc<dyn Database>,
    registry: Arc<ActionRegistry>,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn Database>, registry: Arc<ActionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Build the context for `label_id` applied to `email_id`.
    ///
    /// Missing or inactive labels, missing emails, cross-account pairs and an
    /// empty action set are configuration errors.
    pub async fn build(&self, label_id: Uuid, email_id: Uuid) -> Result<ActionContext, AutomationError> {
        let label = self
            .store
            .get_label(label_id)
            .await?
            .ok_or_else(|| AutomationError::Configuration(format!("label {label_id} not found")))?;
        if !label.is_active {
            return Err(AutomationError::Configuration(format!(
                "label '{}' is inactive",
                label.name
            )));
        }
        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or_else(|| AutomationError::Configuration(format!("email {email_id} not found")))?;
        if email.account_id != label.account_id {
            return Err(AutomationError::Configuration(format!(
                "label '{}' belongs to a different account than email {email_id}",
                label.name
            )));
        }
        let account = self
            .store
            .get_account(email.account_id)
            .await?
            .ok_or_else(|| {
                AutomationError::Configuration(format!("account {} not found", email.account_id))
            })?;

        let mode = label.mode;
        let linked_actions = self.store.list_label_actions(label.id).await?;
        let available_actions = if !linked_actions.is_empty() {
            linked_actions.iter().map(|l| l.action.clone()).collect()
        } else if mode == AutomationMode::Ai {
            self.store.list_actions(Some(account.id)).await?
        } else {
            Vec::new()
        };
        if available_actions.is_empty() {
            return Err(AutomationError::Configuration(format!(
                "no actions available for label '{}'",
                label.name
            )));
        }

        let sops = self.store.list_active_sops(account.id).await?;
        let other_labels = self
            .store
            .list_active_labels(account.id)
            .await?
            .into_iter()
            .filter(|l| l.id != label.id)
            .take(OTHER_LABELS_LIMIT)
            .collect();
        let tools = self.registry.tool_definitions(&available_actions);

        tracing::debug!(
            label = %label.name,
            email_id = %email.id,
            mode = %mode,
            actions = available_actions.len(),
            sops = sops.len(),
            "Built action context"
        );

        Ok(ActionContext {
            summary: EmailSummary::from_email(&email),
            label,
            mode,
            email,
            account,
            linked_actions,
            available_actions,
            sops,
            other_labels,
            tools,
        })
    }
}
