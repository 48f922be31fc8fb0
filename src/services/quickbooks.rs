use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::services::ensure_success;

const MINOR_VERSION: &str = "73";

/// OAuth token plus the QuickBooks company (realm) it belongs to.
#[derive(Debug, Clone)]
pub struct LedgerCredentials {
    pub token: String,
    pub realm_id: String,
}

/// Accounting ledger REST API.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Runs a ledger query and returns the `QueryResponse` object.
    async fn query(&self, credentials: &LedgerCredentials, query: &str) -> Result<Value>;

    /// Creates a bill and returns the created `Bill` object.
    async fn create_bill(&self, credentials: &LedgerCredentials, bill: &BillPayload) -> Result<Value>;

    async fn get_vendor(&self, credentials: &LedgerCredentials, vendor_id: &str) -> Result<Value>;
}

/// `{"value": "<id>"}` reference to another ledger entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub value: String,
}

impl Reference {
    pub fn new(value: &str) -> Self {
        Reference {
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BillPayload {
    pub vendor_ref: Reference,
    pub line: Vec<BillLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BillLine {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub detail_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub account_based_expense_line_detail: ExpenseLineDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpenseLineDetail {
    pub account_ref: Reference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<Reference>,
    pub billable_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryEnvelope {
    #[serde(default)]
    query_response: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BillEnvelope {
    bill: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VendorEnvelope {
    vendor: Value,
}

pub struct QuickBooksClient {
    http: reqwest::Client,
    base_url: String,
}

impl QuickBooksClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        QuickBooksClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn company_url(&self, realm_id: &str, path: &str) -> String {
        format!("{}/company/{}/{}", self.base_url, realm_id, path)
    }
}

#[async_trait]
impl Ledger for QuickBooksClient {
    async fn query(&self, credentials: &LedgerCredentials, query: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.company_url(&credentials.realm_id, "query"))
            .query(&[("query", query), ("minorversion", MINOR_VERSION)])
            .bearer_auth(&credentials.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = ensure_success(response, "quickbooks").await?;
        let envelope: QueryEnvelope = response.json().await?;
        Ok(envelope.query_response)
    }

    async fn create_bill(&self, credentials: &LedgerCredentials, bill: &BillPayload) -> Result<Value> {
        let response = self
            .http
            .post(self.company_url(&credentials.realm_id, "bill"))
            .query(&[("minorversion", MINOR_VERSION)])
            .bearer_auth(&credentials.token)
            .header("Accept", "application/json")
            .json(bill)
            .send()
            .await?;
        let response = ensure_success(response, "quickbooks").await?;
        let envelope: BillEnvelope = response.json().await?;
        Ok(envelope.bill)
    }

    async fn get_vendor(&self, credentials: &LedgerCredentials, vendor_id: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.company_url(&credentials.realm_id, &format!("vendor/{}", vendor_id)))
            .query(&[("minorversion", MINOR_VERSION)])
            .bearer_auth(&credentials.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = ensure_success(response, "quickbooks").await?;
        let envelope: VendorEnvelope = response.json().await?;
        Ok(envelope.vendor)
    }
}
