use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::commands::{data, ApiResult, AuthUser};
use crate::models::{EmailMessage, ScanReport};
use crate::services::gmail::{BatchModifyRequest, Label};
use crate::services::ingestion;
use crate::services::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct IgnoreRequest {
    pub ids: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mailbox/scan", post(scan))
        .route("/mailbox/labels", get(list_labels).post(create_label))
        .route("/mailbox/messages", get(list_messages))
        .route("/mailbox/batch-modify", post(batch_modify))
        .route("/mailbox/ignore", post(ignore))
}

async fn scan(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<ScanReport> {
    let report = ingestion::scan_mailbox(&state, &user).await?;
    Ok(data(report))
}

async fn list_labels(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Label>> {
    Ok(data(ingestion::list_labels(&state, &user).await?))
}

async fn create_label(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<LabelRequest>,
) -> ApiResult<Label> {
    Ok(data(ingestion::create_label(&state, &user, &request.name).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Vec<EmailMessage>> {
    Ok(data(ingestion::list_messages(&state, &user, &query.q).await?))
}

async fn batch_modify(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<BatchModifyRequest>,
) -> ApiResult<bool> {
    ingestion::batch_modify(&state, &user, &request).await?;
    Ok(data(true))
}

async fn ignore(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<IgnoreRequest>,
) -> ApiResult<bool> {
    ingestion::ignore_messages(&state, &user, request.ids).await?;
    Ok(data(true))
}
