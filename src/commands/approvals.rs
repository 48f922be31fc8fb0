use axum::extract::{Path, State};
use axum::routing::put;
use axum::{Json, Router};
use serde::Deserialize;

use crate::commands::{data, ApiResult, AuthUser};
use crate::models::{Approval, ApprovalStatus, Company};
use crate::services::approvals;
use crate::services::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub status: ApprovalStatus,
}

#[derive(Debug, Deserialize)]
pub struct DefaultApproversRequest {
    pub approver_ids: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/approvals/:id", put(set_status))
        .route("/companies/:id/default-approvers", put(set_default_approvers))
}

async fn set_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<Approval> {
    let approval = state.with_db(|db| approvals::set_approval_status(db, &user, &id, request.status))?;
    Ok(data(approval))
}

async fn set_default_approvers(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(company_id): Path<String>,
    Json(request): Json<DefaultApproversRequest>,
) -> ApiResult<Company> {
    let company =
        state.with_db(|db| approvals::set_default_approvers(db, &user, &company_id, request.approver_ids))?;
    Ok(data(company))
}
