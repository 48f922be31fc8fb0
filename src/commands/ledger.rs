use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;
use serde_json::Value;

use crate::commands::{data, ApiResult, AuthUser};
use crate::services::ledger;
use crate::services::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ledger/vendors", get(list_vendors))
        .route("/ledger/vendors/:id", get(get_vendor))
        .route("/ledger/customers", get(list_customers))
        .route("/ledger/accounts", get(list_accounts))
}

async fn list_vendors(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Value>> {
    Ok(data(ledger::list_vendors(&state, &user).await?))
}

async fn get_vendor(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    Ok(data(ledger::get_vendor(&state, &user, &id).await?))
}

async fn list_customers(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Value>> {
    Ok(data(ledger::list_customers(&state, &user).await?))
}

async fn list_accounts(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Value>> {
    Ok(data(ledger::list_accounts(&state, &user).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::commands::tests::send;
    use crate::testing::{seed_company, TestHarness};

    #[tokio::test]
    async fn reference_lists_come_from_the_ledger() {
        let harness = TestHarness::new();
        let user = harness.with_db(|db| seed_company(db, "c1", "u1").1);
        let token = harness.login(&user);

        let (status, body) = send(&harness, "GET", "/ledger/accounts", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["Name"], "Office Supplies");
        assert_eq!(
            harness.ledger.last_query().as_deref(),
            Some("select * from Account MAXRESULTS 1000")
        );

        let (status, body) = send(&harness, "GET", "/ledger/vendors/56", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["Id"], "56");
    }

    #[tokio::test]
    async fn disconnected_ledger_is_unauthorized() {
        let harness = TestHarness::new();
        let user = harness.with_db(|db| seed_company(db, "c1", "u1").1);
        harness.credentials.disconnect();
        let (status, _) = send(&harness, "GET", "/ledger/vendors", Some(&harness.login(&user)), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
