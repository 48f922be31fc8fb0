pub mod accounts;
pub mod approvals;
pub mod credentials;
pub mod crypto;
pub mod extraction;
pub mod gmail;
pub mod ingestion;
pub mod ledger;
pub mod quickbooks;
pub mod review;
pub mod state;
pub mod storage;
pub mod text_extraction;

use reqwest::StatusCode;

use crate::errors::{AppError, Result};

/// Maps a non-2xx response of an external REST dependency to an error,
/// keeping the status line and body for the log.
pub(crate) async fn ensure_success(response: reqwest::Response, service: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(upstream_error(service, status, &body))
}

/// Google answers quota exhaustion with 403, which is a transient failure
/// and not a credential problem.
const RATE_LIMIT_REASONS: [&str; 3] = ["rateLimitExceeded", "userRateLimitExceeded", "quotaExceeded"];

fn upstream_error(service: &str, status: StatusCode, body: &str) -> AppError {
    let message = format!("{} error {}: {}", service, status, body);
    let rate_limited = status == StatusCode::FORBIDDEN && RATE_LIMIT_REASONS.iter().any(|reason| body.contains(reason));
    if !rate_limited && (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN) {
        return AppError::Unauthorized(message);
    }
    AppError::UpstreamUnavailable(message)
}
