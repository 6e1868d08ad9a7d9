//! Email classification: which labels apply, plus a task summary.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::automation::executors::truncate_chars;
use crate::automation::model::Label;
use crate::error::AutomationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::model::EmailMessage;
use crate::tasks::model::{MAX_PRIORITY, MIN_PRIORITY};

const SYSTEM_PROMPT: &str = "You are an email classification assistant for an Australian operations team.
You analyse emails and return structured JSON with task classification.

Return JSON with these exact fields:
- task_title: Clear, actionable task title (max 255 chars)
- task_description: Summary of email content and required action
- priority: Integer 1-5 (1=low priority, 5=urgent)
- labels: Array of applicable label names from the available labels list
- due_date: YYYY-MM-DD format if mentioned in email, null otherwise
- reasoning: Brief explanation of your classification

Use Australian English spelling. Be concise but informative.";

const MAX_BODY_CHARS: usize = 3000;
const MAX_TITLE_CHARS: usize = 255;

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Result of classifying one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub task_title: String,
    pub task_description: String,
    /// Clamped to 1..=5.
    pub priority: i32,
    /// Canonical names of matching labels, in the model's order.
    pub labels: Vec<String>,
    /// `YYYY-MM-DD` when the email mentions one.
    pub due_date: Option<String>,
    pub reasoning: String,
}

/// Decides which of an account's labels apply to an email.
#[async_trait]
pub trait EmailClassifier: Send + Sync {
    async fn classify(
        &self,
        email: &EmailMessage,
        labels: &[Label],
    ) -> Result<Classification, AutomationError>;
}

/// Classifier backed by a JSON-mode LLM completion.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl EmailClassifier for LlmClassifier {
    async fn classify(
        &self,
        email: &EmailMessage,
        labels: &[Label],
    ) -> Result<Classification, AutomationError> {
        let subject = display_subject(email);
        let body = strip_html(&email.body_html);
        let user_prompt = format!(
            "Available Labels:\n{}\n\nEmail to classify:\nSubject: {}\nFrom: {}\nBody:\n{}\n\nReturn JSON only, no additional text.",
            format_labels(labels),
            subject,
            sender(email),
            truncate_chars(&body, MAX_BODY_CHARS),
        );
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ])
        .with_json_mode();

        let response = self.llm.complete(request).await?;
        let classification = parse_classification(&response.content, email, labels)?;
        tracing::debug!(
            email_id = %email.id,
            labels = ?classification.labels,
            priority = classification.priority,
            "Email classified"
        );
        Ok(classification)
    }
}

/// Parse and sanitise the model's JSON.
pub fn parse_classification(
    content: &str,
    email: &EmailMessage,
    labels: &[Label],
) -> Result<Classification, AutomationError> {
    let data: Value = serde_json::from_str(content.trim()).map_err(|e| {
        AutomationError::ExternalCall(format!("classification is not valid JSON: {e}"))
    })?;
    if !data.is_object() {
        return Err(AutomationError::ExternalCall(
            "classification is not a JSON object".to_string(),
        ));
    }

    let text = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let task_title = text("task_title").unwrap_or_else(|| display_subject(email).to_string());
    let task_description = text("task_description")
        .unwrap_or_else(|| format!("Email from {}: {}", sender(email), display_subject(email)));

    Ok(Classification {
        task_title: truncate_chars(&task_title, MAX_TITLE_CHARS),
        task_description,
        priority: parse_priority(data.get("priority")),
        labels: match_labels(data.get("labels"), labels),
        due_date: text("due_date"),
        reasoning: text("reasoning").unwrap_or_default(),
    })
}

fn parse_priority(value: Option<&Value>) -> i32 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().map(|f| f as i64),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    raw.map(|p| p.clamp(MIN_PRIORITY as i64, MAX_PRIORITY as i64) as i32)
        .unwrap_or(MIN_PRIORITY)
}

/// Keep names that match an available label case-insensitively, returning
/// the label's own spelling without duplicates.
fn match_labels(value: Option<&Value>, labels: &[Label]) -> Vec<String> {
    let Some(Value::Array(names)) = value else {
        return Vec::new();
    };
    let mut matched: Vec<String> = Vec::new();
    for name in names.iter().filter_map(Value::as_str) {
        let wanted = name.trim().to_lowercase();
        if let Some(label) = labels.iter().find(|l| l.name.to_lowercase() == wanted)
            && !matched.contains(&label.name)
        {
            matched.push(label.name.clone());
        }
    }
    matched
}

fn format_labels(labels: &[Label]) -> String {
    if labels.is_empty() {
        return "No labels available".to_string();
    }
    labels
        .iter()
        .map(|l| {
            if l.prompt.trim().is_empty() {
                format!("- {}", l.name)
            } else {
                format!("- {} ({})", l.name, l.prompt.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_subject(email: &EmailMessage) -> &str {
    let subject = email.subject.trim();
    if subject.is_empty() { "(No subject)" } else { subject }
}

fn sender(email: &EmailMessage) -> &str {
    let name = email.from_name.trim();
    if name.is_empty() { &email.from_address } else { name }
}

/// Strip tags, decode common entities and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let text = TAGS.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}
