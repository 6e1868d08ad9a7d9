//! Cached mail, automation triggers and their outputs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::{ApiError, AppState, require_account, required};
use crate::automation::model::Label;
use crate::automation::run::AutomationRun;
use crate::mail::model::{Draft, EmailMessage};
use crate::store::ListFilter;
use crate::tasks::Task;
use crate::worker::AutomationJob;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/emails", get(list_emails).post(ingest_email))
        .route("/api/emails/{id}", get(get_email))
        .route("/api/emails/{id}/process", post(process_email))
        .route(
            "/api/emails/{id}/labels/{label_id}/trigger",
            post(trigger_label),
        )
        .route("/api/emails/{id}/labels/{label_id}/run", post(run_label))
        .route("/api/drafts", get(list_drafts))
        .route("/api/tasks", get(list_tasks))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
}

#[derive(Debug, Deserialize)]
pub struct NewEmail {
    pub account_id: Uuid,
    pub external_message_id: String,
    #[serde(default)]
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
    #[serde(default)]
    pub date_sent: Option<DateTime<Utc>>,
}

/// An email with the labels applied to it.
#[derive(Debug, Serialize)]
pub struct EmailDetail {
    #[serde(flatten)]
    pub email: EmailMessage,
    pub labels: Vec<Label>,
}

async fn list_emails(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<EmailMessage>>, ApiError> {
    Ok(Json(state.store.list_emails(filter.account_id).await?))
}

/// POST /api/emails
///
/// Caches a message handed over by the mail sync. Processing is a
/// separate step so callers can ingest in bulk first.
async fn ingest_email(
    State(state): State<AppState>,
    Json(body): Json<NewEmail>,
) -> Result<(StatusCode, Json<EmailMessage>), ApiError> {
    require_account(state.store.as_ref(), body.account_id).await?;
    let mut email = EmailMessage::new(
        body.account_id,
        required(&body.external_message_id, "external_message_id")?,
        required(&body.from_address, "from_address")?,
        body.subject,
    )
    .with_from_name(body.from_name)
    .with_body(body.body_html);
    email.thread_id = body.thread_id;
    email.to_addresses = body.to_addresses;
    email.date_sent = body.date_sent;
    state.store.insert_email(&email).await?;
    tracing::debug!(id = %email.id, account_id = %email.account_id, "Email ingested");
    Ok((StatusCode::CREATED, Json(email)))
}

async fn load_email(state: &AppState, id: Uuid) -> Result<EmailMessage, ApiError> {
    state
        .store
        .get_email(id)
        .await?
        .ok_or_else(|| ApiError::not_found("email", id))
}

async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailDetail>, ApiError> {
    let email = load_email(&state, id).await?;
    let mut labels = Vec::new();
    for applied in state.store.list_email_labels(id).await? {
        if let Some(label) = state.store.get_label(applied.label_id).await? {
            labels.push(label);
        }
    }
    Ok(Json(EmailDetail { email, labels }))
}

fn accepted(job: AutomationJob) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "job": job})),
    )
}

async fn process_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    load_email(&state, id).await?;
    let job = AutomationJob::ProcessEmail { email_id: id };
    state.queue.enqueue(job)?;
    Ok(accepted(job))
}

async fn trigger_label(
    State(state): State<AppState>,
    Path((id, label_id)): Path<(Uuid, Uuid)>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    load_email(&state, id).await?;
    if state.store.get_label(label_id).await?.is_none() {
        return Err(ApiError::not_found("label", label_id));
    }
    let job = AutomationJob::TriggerLabel {
        label_id,
        email_id: id,
    };
    state.queue.enqueue(job)?;
    Ok(accepted(job))
}

/// POST /api/emails/{id}/labels/{label_id}/run
///
/// Runs the label synchronously and returns the recorded run. A failed run
/// is still a 200: the failure is in the run body.
async fn run_label(
    State(state): State<AppState>,
    Path((id, label_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<AutomationRun>, ApiError> {
    let run = state.orchestrator.run(label_id, id).await?;
    Ok(Json(run))
}

async fn list_drafts(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Draft>>, ApiError> {
    Ok(Json(state.store.list_drafts(filter).await?))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.store.list_tasks(filter).await?))
}

async fn list_runs(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<AutomationRun>>, ApiError> {
    Ok(Json(state.store.list_runs(filter).await?))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AutomationRun>, ApiError> {
    state
        .store
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("run", id))
}
