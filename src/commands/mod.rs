pub mod approvals;
pub mod auth;
pub mod dashboard;
pub mod documents;
pub mod integrations;
pub mod ledger;
pub mod mailbox;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::errors::{AppError, Result};
use crate::models::User;
use crate::services::accounts;
use crate::services::state::AppState;

/// Success body: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

pub fn data<T: Serialize>(value: T) -> Json<Envelope<T>> {
    Json(Envelope { data: value })
}

pub type ApiResult<T> = Result<Json<Envelope<T>>>;

/// Raw `Authorization: Bearer ...` token.
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| BearerToken(token.trim().to_string()))
            .filter(|bearer| !bearer.0.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Missing or invalid Authorization header".to_string()))
    }
}

/// The user behind a live session.
pub struct AuthUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        state
            .with_db(|db| accounts::authenticate(db, &token))
            .map(AuthUser)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/files/*key", get(serve_file))
        .merge(auth::routes())
        .merge(documents::routes())
        .merge(approvals::routes())
        .merge(integrations::routes())
        .merge(mailbox::routes())
        .merge(ledger::routes())
        .merge(dashboard::routes())
        .with_state(state)
}

async fn healthcheck() -> Json<Envelope<&'static str>> {
    data("ok")
}

async fn serve_file(State(state): State<AppState>, Path(key): Path<String>) -> Result<impl IntoResponse> {
    let bytes = state.storage.read(&key).await?;
    let content_type = if key.to_ascii_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    Ok(([(CONTENT_TYPE, content_type)], bytes))
}
