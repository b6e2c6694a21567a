//! HTTP request handlers.

use super::AppState;
use crate::error::MonitorError;
use crate::registry::NewTarget;
use crate::store::TargetId;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

// ============================================================================
// Health
// ============================================================================

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "message": "sitewatch is running",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_list_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.list_targets())
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<NewTarget>,
) -> Result<impl IntoResponse, MonitorError> {
    let target = state.monitor.add_target(&req.name, &req.url)?;
    Ok((StatusCode::CREATED, Json(target)))
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetsRequest {
    pub targets: Vec<NewTarget>,
}

pub async fn handle_create_targets(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetsRequest>,
) -> Result<impl IntoResponse, MonitorError> {
    let targets = state.monitor.add_targets(&req.targets)?;
    Ok((StatusCode::CREATED, Json(targets)))
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MonitorError> {
    state.monitor.remove_target(&TargetId::from(id))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_check_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, MonitorError> {
    let outcome = state.monitor.check_target(&TargetId::from(id)).await?;
    Ok(Json(outcome))
}

pub async fn handle_check_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.check_all_targets().await)
}

// ============================================================================
// API: Notification preferences
// ============================================================================

pub async fn handle_get_preferences(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "preferences": state.monitor.notification_preferences() }))
}

#[derive(Debug, Deserialize)]
pub struct PreferenceRequest {
    pub enabled: bool,
}

pub async fn handle_set_preference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PreferenceRequest>,
) -> Result<impl IntoResponse, MonitorError> {
    let id = TargetId::from(id);
    state.monitor.set_notification_preference(&id, req.enabled)?;
    Ok(Json(json!({ "id": id, "enabled": req.enabled })))
}
