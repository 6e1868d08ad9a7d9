//! Configuration CRUD: labels, actions, label links and SOPs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, AppState, default_true, require_account, required};
use crate::automation::model::{
    Action, ActionFunction, AutomationMode, Label, LabelAction, LinkedAction, Sop,
};
use crate::store::ListFilter;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/labels", get(list_labels).post(create_label))
        .route(
            "/api/labels/{id}",
            get(get_label).put(update_label).delete(delete_label),
        )
        .route(
            "/api/labels/{id}/actions",
            get(list_label_actions).post(link_action),
        )
        .route(
            "/api/labels/{id}/actions/{action_id}",
            delete(unlink_action),
        )
        .route("/api/actions", get(list_actions).post(create_action))
        .route(
            "/api/actions/{id}",
            get(get_action).put(update_action).delete(delete_action),
        )
        .route("/api/sops", get(list_sops).post(create_sop))
        .route(
            "/api/sops/{id}",
            get(get_sop).put(update_sop).delete(delete_sop),
        )
}

fn deleted(found: bool, entity: &str, id: Uuid) -> Result<StatusCode, ApiError> {
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(entity, id))
    }
}

/// Empty text clears an optional field.
fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

// ── Labels ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewLabel {
    pub account_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub sop_context: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub mode: AutomationMode,
}

#[derive(Debug, Default, Deserialize)]
pub struct LabelUpdate {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub sop_context: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub mode: Option<AutomationMode>,
}

async fn list_labels(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Label>>, ApiError> {
    Ok(Json(state.store.list_labels(filter.account_id).await?))
}

async fn create_label(
    State(state): State<AppState>,
    Json(body): Json<NewLabel>,
) -> Result<(StatusCode, Json<Label>), ApiError> {
    require_account(state.store.as_ref(), body.account_id).await?;
    let mut label = Label::new(body.account_id, required(&body.name, "name")?)
        .with_prompt(body.prompt)
        .with_instructions(body.instructions)
        .with_priority(body.priority)
        .with_mode(body.mode);
    label.sop_context = body.sop_context.and_then(non_empty);
    label.is_active = body.is_active;
    state.store.create_label(&label).await?;
    tracing::info!(id = %label.id, name = %label.name, mode = %label.mode, "Label created");
    Ok((StatusCode::CREATED, Json(label)))
}

async fn load_label(state: &AppState, id: Uuid) -> Result<Label, ApiError> {
    state
        .store
        .get_label(id)
        .await?
        .ok_or_else(|| ApiError::not_found("label", id))
}

async fn get_label(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Label>, ApiError> {
    Ok(Json(load_label(&state, id).await?))
}

async fn update_label(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<LabelUpdate>,
) -> Result<Json<Label>, ApiError> {
    let mut label = load_label(&state, id).await?;
    if let Some(name) = body.name {
        label.name = required(&name, "name")?;
    }
    if let Some(prompt) = body.prompt {
        label.prompt = prompt;
    }
    if let Some(instructions) = body.instructions {
        label.instructions = instructions;
    }
    if let Some(sop) = body.sop_context {
        label.sop_context = non_empty(sop);
    }
    if let Some(priority) = body.priority {
        label.priority = priority;
    }
    if let Some(active) = body.is_active {
        label.is_active = active;
    }
    if let Some(mode) = body.mode {
        label.mode = mode;
    }
    label.updated_at = Utc::now();
    state.store.update_label(&label).await?;
    Ok(Json(label))
}

async fn delete_label(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deleted(state.store.delete_label(id).await?, "label", id)
}

// ── Label links ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub action_id: Uuid,
    /// Defaults to the end of the current list.
    #[serde(default)]
    pub order: Option<i32>,
}

async fn list_label_actions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LinkedAction>>, ApiError> {
    load_label(&state, id).await?;
    Ok(Json(state.store.list_label_actions(id).await?))
}

async fn link_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<LinkRequest>,
) -> Result<(StatusCode, Json<LabelAction>), ApiError> {
    let order = match body.order {
        Some(order) => order,
        None => {
            let linked = state.store.list_label_actions(id).await?;
            linked.last().map_or(1, |l| l.order + 1)
        }
    };
    let link = state.store.link_action(id, body.action_id, order).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn unlink_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if state.store.unlink_action(id, action_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "action {action_id} is not linked to label {id}"
        )))
    }
}

// ── Actions ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewAction {
    pub account_id: Uuid,
    pub name: String,
    pub function: ActionFunction,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionUpdate {
    pub name: Option<String>,
    pub function: Option<ActionFunction>,
    pub instructions: Option<String>,
    pub tool_name: Option<String>,
    pub tool_description: Option<String>,
}

async fn list_actions(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Action>>, ApiError> {
    Ok(Json(state.store.list_actions(filter.account_id).await?))
}

async fn create_action(
    State(state): State<AppState>,
    Json(body): Json<NewAction>,
) -> Result<(StatusCode, Json<Action>), ApiError> {
    require_account(state.store.as_ref(), body.account_id).await?;
    let mut action = Action::new(body.account_id, required(&body.name, "name")?, body.function)
        .with_instructions(body.instructions)
        .with_tool_description(body.tool_description);
    action.tool_name = body.tool_name.and_then(non_empty);
    state.store.create_action(&action).await?;
    tracing::info!(id = %action.id, function = action.function.as_str(), "Action created");
    Ok((StatusCode::CREATED, Json(action)))
}

async fn load_action(state: &AppState, id: Uuid) -> Result<Action, ApiError> {
    state
        .store
        .get_action(id)
        .await?
        .ok_or_else(|| ApiError::not_found("action", id))
}

async fn get_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Action>, ApiError> {
    Ok(Json(load_action(&state, id).await?))
}

async fn update_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActionUpdate>,
) -> Result<Json<Action>, ApiError> {
    let mut action = load_action(&state, id).await?;
    if let Some(name) = body.name {
        action.name = required(&name, "name")?;
    }
    if let Some(function) = body.function {
        action.function = function;
    }
    if let Some(instructions) = body.instructions {
        action.instructions = instructions;
    }
    if let Some(tool_name) = body.tool_name {
        action.tool_name = non_empty(tool_name);
    }
    if let Some(description) = body.tool_description {
        action.tool_description = description;
    }
    state.store.update_action(&action).await?;
    Ok(Json(action))
}

async fn delete_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deleted(state.store.delete_action(id).await?, "action", id)
}

// ── SOPs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct NewSop {
    pub account_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SopUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
}

async fn list_sops(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Sop>>, ApiError> {
    Ok(Json(state.store.list_sops(filter.account_id).await?))
}

async fn create_sop(
    State(state): State<AppState>,
    Json(body): Json<NewSop>,
) -> Result<(StatusCode, Json<Sop>), ApiError> {
    require_account(state.store.as_ref(), body.account_id).await?;
    let mut sop = Sop::new(body.account_id, required(&body.name, "name")?)
        .with_description(body.description)
        .with_instructions(body.instructions)
        .with_priority(body.priority);
    sop.is_active = body.is_active;
    state.store.create_sop(&sop).await?;
    Ok((StatusCode::CREATED, Json(sop)))
}

async fn load_sop(state: &AppState, id: Uuid) -> Result<Sop, ApiError> {
    state
        .store
        .get_sop(id)
        .await?
        .ok_or_else(|| ApiError::not_found("sop", id))
}

async fn get_sop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Sop>, ApiError> {
    Ok(Json(load_sop(&state, id).await?))
}

async fn update_sop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SopUpdate>,
) -> Result<Json<Sop>, ApiError> {
    let mut sop = load_sop(&state, id).await?;
    if let Some(name) = body.name {
        sop.name = required(&name, "name")?;
    }
    if let Some(description) = body.description {
        sop.description = description;
    }
    if let Some(instructions) = body.instructions {
        sop.instructions = instructions;
    }
    if let Some(priority) = body.priority {
        sop.priority = priority;
    }
    if let Some(active) = body.is_active {
        sop.is_active = active;
    }
    sop.updated_at = Utc::now();
    state.store.update_sop(&sop).await?;
    Ok(Json(sop))
}

async fn delete_sop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    deleted(state.store.delete_sop(id).await?, "sop", id)
}
