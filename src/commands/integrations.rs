use axum::extract::{Path, State};
use axum::routing::post;
use axum::Router;
use serde::Serialize;
use tracing::info;

use crate::commands::{data, ApiResult, AuthUser};
use crate::errors::AppError;
use crate::models::GmailIntegration;
use crate::services::credentials::Provider;
use crate::services::ingestion;
use crate::services::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConnectSession {
    pub token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/integrations/gmail", post(setup_gmail))
        .route("/integrations/:provider/connect", post(connect))
}

/// Starts an OAuth connection for the caller's company.
async fn connect(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(provider): Path<String>,
) -> ApiResult<ConnectSession> {
    let provider = Provider::parse(&provider)
        .ok_or_else(|| AppError::BadRequest(format!("unknown provider {}", provider)))?;
    let token = state
        .credentials
        .create_connect_session(provider, &user.company_id)
        .await?;
    info!(company_id = %user.company_id, provider = provider.as_str(), "connect session created");
    Ok(data(ConnectSession { token }))
}

async fn setup_gmail(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<GmailIntegration> {
    let integration = ingestion::setup_gmail(&state, &user).await?;
    Ok(data(integration))
}
