//! `/api/accounts`: connected mailboxes and their recommended setup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState, default_true, required};
use crate::automation::recommended::{SetupSummary, setup_account_automation};
use crate::mail::model::{Account, MailProvider};

#[derive(Debug, Deserialize)]
pub struct NewAccount {
    pub provider: MailProvider,
    pub email: String,
    #[serde(default)]
    pub writing_style: String,
    #[serde(default)]
    pub signature_html: String,
    #[serde(default = "default_true")]
    pub is_connected: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountUpdate {
    pub writing_style: Option<String>,
    pub signature_html: Option<String>,
    pub is_connected: Option<bool>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route(
            "/api/accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/api/accounts/{id}/setup", post(setup_account))
}

async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<Account>>, ApiError> {
    Ok(Json(state.store.list_accounts().await?))
}

async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<NewAccount>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let mut account = Account::new(body.provider, required(&body.email, "email")?)
        .with_writing_style(body.writing_style)
        .with_signature(body.signature_html);
    account.is_connected = body.is_connected;
    state.store.create_account(&account).await?;
    tracing::info!(id = %account.id, email = %account.email, "Account created");
    Ok((StatusCode::CREATED, Json(account)))
}

async fn load(state: &AppState, id: Uuid) -> Result<Account, ApiError> {
    state
        .store
        .get_account(id)
        .await?
        .ok_or_else(|| ApiError::not_found("account", id))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(load(&state, id).await?))
}

async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountUpdate>,
) -> Result<Json<Account>, ApiError> {
    let mut account = load(&state, id).await?;
    if let Some(style) = body.writing_style {
        account.writing_style = style;
    }
    if let Some(signature) = body.signature_html {
        account.signature_html = signature;
    }
    if let Some(connected) = body.is_connected {
        account.is_connected = connected;
    }
    account.updated_at = Utc::now();
    state.store.update_account(&account).await?;
    Ok(Json(account))
}

async fn delete_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_account(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("account", id))
    }
}

/// POST /api/accounts/{id}/setup
///
/// Creates the recommended actions and labels. Safe to repeat.
async fn setup_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SetupSummary>, ApiError> {
    let account = load(&state, id).await?;
    let summary = setup_account_automation(state.store.as_ref(), &account).await?;
    Ok(Json(summary))
}
