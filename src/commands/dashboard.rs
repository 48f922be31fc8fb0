use axum::extract::State;
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use crate::commands::{data, ApiResult, AuthUser};
use crate::models::DashboardStats;
use crate::services::review;
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(get_dashboard_stats))
}

async fn get_dashboard_stats(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<DashboardStats> {
    let stats = state.with_db(|db| review::dashboard(db, &user, Utc::now()))?;
    Ok(data(stats))
}
