use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{error, info};

use crate::config::LedgerDefaults;
use crate::errors::{AppError, Result};
use crate::models::{DocumentStatus, InvoiceData, LedgerResult, User};
use crate::services::credentials::Provider;
use crate::services::quickbooks::{BillLine, BillPayload, ExpenseLineDetail, LedgerCredentials, Reference};
use crate::services::review::visible_document;
use crate::services::state::AppState;
use crate::utils::{format_decimal, now_rfc3339, parse_decimal};

const DETAIL_TYPE: &str = "AccountBasedExpenseLineDetail";
const MAX_RESULTS: u32 = 1000;

/// Posts an approved document to the ledger as a bill and marks it PROCESSED.
pub async fn submit_to_ledger(state: &AppState, user: &User, document_id: &str) -> Result<LedgerResult> {
    let document = state.with_db(|db| visible_document(db, user, document_id))?;
    if document.status != DocumentStatus::Approved {
        return Err(AppError::InvalidTransition {
            from: document.status,
            to: DocumentStatus::Processed,
        });
    }
    let data = document
        .data
        .as_ref()
        .ok_or_else(|| AppError::Conflict(format!("document {} has no extracted data", document.id)))?;

    let bill = build_bill(data, &state.config.ledger_defaults)?;
    let total: Decimal = bill.line.iter().map(|line| line.amount).sum();
    let credentials = ledger_credentials(state, &document.company_id).await?;

    let created = match state.ledger.create_bill(&credentials, &bill).await {
        Ok(created) => created,
        Err(err) => {
            error!(document_id = %document.id, error = %err, "bill creation failed");
            let message = err.to_string();
            state.with_db(|db| {
                db.log_processing(Some(&document.id), Some(&document.file_hash), "submit", "failed", Some(&message))
            })?;
            return Err(AppError::LedgerRejected(message));
        }
    };
    let bill_id = created
        .get("Id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::LedgerRejected("ledger response carries no bill id".to_string()))?
        .to_string();

    let changed = state.with_db(|db| db.mark_processed(&document.id, &bill_id, &now_rfc3339()))?;
    if changed == 0 {
        return Err(AppError::Conflict(format!(
            "document {} changed while bill {} was created",
            document.id, bill_id
        )));
    }
    state.with_db(|db| {
        db.log_processing(Some(&document.id), Some(&document.file_hash), "submit", "success", Some(&bill_id))
    })?;
    info!(document_id = %document.id, bill_id = %bill_id, "bill created");

    Ok(LedgerResult {
        document_id: document.id,
        bill_id,
        total_amount: format_decimal(total),
    })
}

pub fn build_bill(data: &InvoiceData, defaults: &LedgerDefaults) -> Result<BillPayload> {
    let mut line = Vec::with_capacity(data.line_items.len().max(1));
    for item in &data.line_items {
        let amount = amount("line item totalAmount", &item.total_amount)?;
        let customer_ref = item.customer_ref.clone().or_else(|| defaults.customer_ref.clone());
        if item.billable && customer_ref.is_none() {
            return Err(AppError::BadRequest(format!(
                "billable line \"{}\" needs a customer",
                item.description
            )));
        }
        line.push(BillLine {
            amount,
            detail_type: DETAIL_TYPE.to_string(),
            description: non_empty(&item.description),
            account_based_expense_line_detail: ExpenseLineDetail {
                account_ref: Reference::new(item.account_ref.as_deref().unwrap_or(&defaults.account_ref)),
                customer_ref: customer_ref.as_deref().map(Reference::new),
                billable_status: if item.billable { "Billable" } else { "NotBillable" }.to_string(),
            },
        });
    }

    // Documents without line items are booked as one line over the total.
    if line.is_empty() {
        line.push(BillLine {
            amount: amount("totalAmount", &data.total_amount)?,
            detail_type: DETAIL_TYPE.to_string(),
            description: non_empty(&data.supplier_name),
            account_based_expense_line_detail: ExpenseLineDetail {
                account_ref: Reference::new(&defaults.account_ref),
                customer_ref: defaults.customer_ref.as_deref().map(Reference::new),
                billable_status: "NotBillable".to_string(),
            },
        });
    }

    Ok(BillPayload {
        vendor_ref: Reference::new(data.vendor_ref.as_deref().unwrap_or(&defaults.vendor_ref)),
        line,
        txn_date: non_empty(&data.date),
        due_date: non_empty(&data.due_date),
        doc_number: non_empty(&data.invoice_number),
    })
}

pub async fn list_vendors(state: &AppState, user: &User) -> Result<Vec<Value>> {
    query_entities(state, user, "Vendor").await
}

pub async fn list_customers(state: &AppState, user: &User) -> Result<Vec<Value>> {
    query_entities(state, user, "Customer").await
}

pub async fn list_accounts(state: &AppState, user: &User) -> Result<Vec<Value>> {
    query_entities(state, user, "Account").await
}

pub async fn get_vendor(state: &AppState, user: &User, vendor_id: &str) -> Result<Value> {
    let credentials = ledger_credentials(state, &user.company_id).await?;
    state.ledger.get_vendor(&credentials, vendor_id).await
}

async fn query_entities(state: &AppState, user: &User, entity: &str) -> Result<Vec<Value>> {
    let credentials = ledger_credentials(state, &user.company_id).await?;
    let query = format!("select * from {} MAXRESULTS {}", entity, MAX_RESULTS);
    let response = state.ledger.query(&credentials, &query).await?;
    Ok(response
        .get(entity)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

async fn ledger_credentials(state: &AppState, company_id: &str) -> Result<LedgerCredentials> {
    let token = state.credentials.get_token(Provider::Quickbooks, company_id).await?;
    let metadata = state
        .credentials
        .get_connection_metadata(Provider::Quickbooks, company_id)
        .await?;
    let realm_id = metadata
        .realm_id
        .ok_or_else(|| AppError::Unauthorized("QuickBooks connection has no realm id".to_string()))?;
    Ok(LedgerCredentials { token, realm_id })
}

fn amount(field: &str, raw: &str) -> Result<Decimal> {
    parse_decimal(raw).ok_or_else(|| AppError::BadRequest(format!("{} is not a decimal amount: {}", field, raw)))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
