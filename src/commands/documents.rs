use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::commands::{data, ApiResult, AuthUser};
use crate::errors::AppError;
use crate::models::{
    ApprovalState, Document, DocumentDetail, DocumentKind, DocumentStatus, DocumentSummary, ExtractedAttachment,
    InvoiceData, LedgerResult,
};
use crate::services::state::AppState;
use crate::services::{approvals, ingestion, ledger, review};

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub kind: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub deleted: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: DocumentStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents", get(list_documents).delete(delete_documents))
        .route(
            "/documents/upload",
            post(upload_document).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/:id", get(get_document))
        .route("/documents/:id/data", put(update_data))
        .route("/documents/:id/status", post(set_status))
        .route("/documents/:id/extract", post(extract))
        .route("/documents/:id/approvers/:user_id", post(toggle_approver))
        .route("/documents/:id/submit", post(submit))
}

fn parse_kind(raw: Option<&str>) -> Result<Option<DocumentKind>, AppError> {
    raw.map(|value| {
        DocumentKind::parse(value).ok_or_else(|| AppError::BadRequest(format!("unknown kind {}", value)))
    })
    .transpose()
}

async fn list_documents(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<DocumentSummary>> {
    let kind = parse_kind(query.kind.as_deref())?;
    let status = query
        .status
        .as_deref()
        .map(|value| {
            DocumentStatus::parse(value).ok_or_else(|| AppError::BadRequest(format!("unknown status {}", value)))
        })
        .transpose()?;
    let documents = state.with_db(|db| review::list_documents(db, &user, kind, status))?;
    Ok(data(documents))
}

async fn upload_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<ExtractedAttachment> {
    let kind = parse_kind(query.kind.as_deref())?.unwrap_or(DocumentKind::Invoice);
    let file_name = query
        .file_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("file_name is required".to_string()))?;
    let outcome = ingestion::ingest_upload(&state, &user, kind, &file_name, body.to_vec()).await?;
    Ok(data(outcome))
}

async fn delete_documents(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<DeleteResult> {
    let deleted = state.with_db(|db| review::delete_documents(db, &user, &request.ids))?;
    Ok(data(DeleteResult { deleted }))
}

async fn get_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<DocumentDetail> {
    let detail = state.with_db(|db| review::document_detail(db, &user, &id))?;
    Ok(data(detail))
}

async fn update_data(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<InvoiceData>,
) -> ApiResult<Document> {
    let document = state.with_db(|db| review::update_document_data(db, &user, &id, payload))?;
    Ok(data(document))
}

async fn set_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Document> {
    let document = state.with_db(|db| review::set_document_status(db, &user, &id, request.status))?;
    Ok(data(document))
}

async fn extract(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Document> {
    let document = ingestion::extract_document(&state, &user, &id).await?;
    Ok(data(document))
}

async fn toggle_approver(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, approver_id)): Path<(String, String)>,
) -> ApiResult<ApprovalState> {
    let approval = state.with_db(|db| approvals::toggle_approver(db, &user, &id, &approver_id))?;
    Ok(data(approval))
}

async fn submit(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<LedgerResult> {
    let result = ledger::submit_to_ledger(&state, &user, &id).await?;
    Ok(data(result))
}
