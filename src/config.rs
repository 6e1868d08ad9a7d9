//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Service configuration, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// API key for the LLM provider.
    pub api_key: SecretString,
    /// Model used for classification, drafting and action planning.
    pub model: String,
    /// Base URL of the chat completions API.
    pub base_url: String,
    /// HTTP timeout for a single LLM call.
    pub llm_timeout: Duration,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Admin API port.
    pub port: u16,
    /// Worker settings.
    pub worker: WorkerConfig,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

/// Background worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker tasks draining the automation queue.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
        }
    }
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let model = lookup("EMAIL_OPS_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base_url = lookup("EMAIL_OPS_OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let timeout_secs: u64 = parse_or(&lookup, "EMAIL_OPS_LLM_TIMEOUT_SECS", 60)?;
        let port: u16 = parse_or(&lookup, "EMAIL_OPS_PORT", 8080)?;

        let defaults = WorkerConfig::default();
        let workers: usize = parse_or(&lookup, "EMAIL_OPS_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_OPS_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let queue_capacity: usize =
            parse_or(&lookup, "EMAIL_OPS_QUEUE_CAPACITY", defaults.queue_capacity)?;

        let db_path = lookup("EMAIL_OPS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/email-ops.db"));

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            base_url,
            llm_timeout: Duration::from_secs(timeout_secs),
            db_path,
            port,
            worker: WorkerConfig {
                workers,
                queue_capacity: queue_capacity.max(1),
            },
            log_dir: lookup("EMAIL_OPS_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(default),
    }
}
