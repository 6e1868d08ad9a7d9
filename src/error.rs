//! Error types for email-ops.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DatabaseError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {used} tokens used, {limit} allowed")]
    ContextLengthExceeded { used: usize, limit: usize },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single action executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Orchestration and classification errors.
///
/// Every variant maps onto one of the three failure kinds recorded on an
/// automation run: configuration, external call, or executor.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("External call failed: {0}")]
    ExternalCall(String),

    #[error("Action {action} failed: {source}")]
    Executor {
        action: String,
        #[source]
        source: ExecutorError,
    },

    #[error("Run {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl AutomationError {
    /// Short kind label stored alongside the failure message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::ExternalCall(_) => "external_call",
            Self::Executor { .. } => "executor",
            Self::InvalidTransition { .. } => "state",
            Self::Database(_) => "database",
        }
    }
}

impl From<LlmError> for AutomationError {
    fn from(e: LlmError) -> Self {
        Self::ExternalCall(e.to_string())
    }
}

/// Background job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Automation queue is full")]
    Full,

    #[error("Automation queue is closed")]
    Closed,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
