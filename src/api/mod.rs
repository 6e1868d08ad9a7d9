//! Admin REST API: configuration CRUD, cached mail and automation runs.

pub mod accounts;
pub mod automation;
pub mod error;
pub mod mail;

pub use error::ApiError;

use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::automation::orchestrator::Orchestrator;
use crate::store::Database;
use crate::worker::AutomationQueue;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    /// Runs label automation inline.
    pub orchestrator: Arc<Orchestrator>,
    /// Background processing.
    pub queue: AutomationQueue,
}

/// Build the admin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(accounts::routes())
        .merge(automation::routes())
        .merge(mail::routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Trimmed, non-empty text field.
pub(crate) fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::BadRequest(format!("{field} must not be empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Ensure the account exists before attaching rows to it.
pub(crate) async fn require_account(
    store: &dyn Database,
    account_id: uuid::Uuid,
) -> Result<(), ApiError> {
    match store.get_account(account_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest(format!("unknown account {account_id}"))),
    }
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::automation::registry::ActionRegistry;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCompletionRequest,
        ToolCompletionResponse,
    };
    use crate::store::LibSqlBackend;

    /// Replies with a fixed draft body and never calls tools.
    pub struct CannedLlm;

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "<p>Thanks, we will be in touch.</p>".into(),
                input_tokens: 12,
                output_tokens: 8,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            Ok(ToolCompletionResponse {
                content: Some("No action needed".into()),
                tool_calls: Vec::new(),
                input_tokens: 30,
                output_tokens: 4,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    /// State over an in-memory store; the queue receiver is returned so
    /// tests can inspect enqueued jobs.
    pub async fn state() -> (
        AppState,
        tokio::sync::mpsc::Receiver<crate::worker::AutomationJob>,
    ) {
        let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm: Arc<dyn LlmProvider> = Arc::new(CannedLlm);
        let registry = Arc::new(ActionRegistry::standard(store.clone(), llm.clone()));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), llm, registry));
        let (queue, rx) = AutomationQueue::new(16);
        (
            AppState {
                store,
                orchestrator,
                queue,
            },
            rx,
        )
    }

    /// Send one request through the router and decode the JSON body.
    pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }
}
