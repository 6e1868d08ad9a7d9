//! Mailbox data model: accounts, cached messages and drafts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mail provider backing an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailProvider {
    Gmail,
    Microsoft,
}

impl MailProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Microsoft => "microsoft",
        }
    }
}

impl std::str::FromStr for MailProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(Self::Gmail),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(format!("unknown mail provider '{other}'")),
        }
    }
}

impl std::fmt::Display for MailProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected mailbox. Owns labels, actions and SOPs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub provider: MailProvider,
    /// Mailbox address; unique together with the provider.
    pub email: String,
    /// Free-form description of how replies should sound.
    #[serde(default)]
    pub writing_style: String,
    #[serde(default)]
    pub signature_html: String,
    pub is_connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(provider: MailProvider, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider,
            email: email.into(),
            writing_style: String::new(),
            signature_html: String::new(),
            is_connected: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set writing style.
    pub fn with_writing_style(mut self, style: impl Into<String>) -> Self {
        self.writing_style = style.into();
        self
    }

    /// Builder: set signature.
    pub fn with_signature(mut self, html: impl Into<String>) -> Self {
        self.signature_html = html.into();
        self
    }
}

/// A cached copy of a message fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Provider message id; unique per account.
    pub external_message_id: String,
    /// Provider thread id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    pub from_address: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub to_addresses: Vec<String>,
    #[serde(default)]
    pub body_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_sent: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EmailMessage {
    pub fn new(
        account_id: Uuid,
        external_message_id: impl Into<String>,
        from_address: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            external_message_id: external_message_id.into(),
            thread_id: None,
            subject: subject.into(),
            from_address: from_address.into(),
            from_name: String::new(),
            to_addresses: Vec::new(),
            body_html: String::new(),
            date_sent: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: set body.
    pub fn with_body(mut self, html: impl Into<String>) -> Self {
        self.body_html = html.into();
        self
    }

    /// Builder: set thread id.
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Builder: set sender display name.
    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = name.into();
        self
    }

    /// Sender formatted as `Name <address>`, or the bare address.
    pub fn sender_display(&self) -> String {
        if self.from_name.trim().is_empty() {
            self.from_address.clone()
        } else {
            format!("{} <{}>", self.from_name, self.from_address)
        }
    }
}

/// A reply draft produced by automation. Never sent by this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Message this draft replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<Uuid>,
    pub subject: String,
    pub body_html: String,
    pub to_addresses: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    /// Reply draft to `email`, addressed to its sender.
    pub fn reply_to(email: &EmailMessage, body_html: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id: email.account_id,
            email_id: Some(email.id),
            subject: reply_subject(&email.subject),
            body_html: body_html.into(),
            to_addresses: vec![email.from_address.clone()],
            created_at: now,
            updated_at: now,
        }
    }
}

/// `Re: <subject>`, without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.is_empty() {
        return "Re: your message".to_string();
    }
    if subject.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        return subject.to_string();
    }
    format!("Re: {subject}")
}
