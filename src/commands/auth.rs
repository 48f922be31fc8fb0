use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::commands::{data, ApiResult, AuthUser, BearerToken};
use crate::models::{Company, Session, User};
use crate::services::accounts::{self, LoginRequest, MemberRequest, RegisterRequest};
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/companies/:id/members", post(add_member))
        .route("/admin/companies", get(list_companies))
}

async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> ApiResult<User> {
    let user = accounts::register(&state, request).await?;
    Ok(data(user))
}

async fn add_member(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Path(company_id): Path<String>,
    Json(request): Json<MemberRequest>,
) -> ApiResult<User> {
    let user = accounts::add_member(&state, &admin, &company_id, request).await?;
    Ok(data(user))
}

async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> ApiResult<Session> {
    let session = accounts::login(&state, request).await?;
    Ok(data(session))
}

async fn logout(State(state): State<AppState>, BearerToken(token): BearerToken) -> ApiResult<bool> {
    state.with_db(|db| accounts::logout(db, &token))?;
    Ok(data(true))
}

async fn list_companies(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Company>> {
    let companies = state.with_db(|db| accounts::list_companies(db, &user))?;
    Ok(data(companies))
}
