use std::collections::HashMap;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::db::Database;
use crate::errors::{AppError, Result};
use crate::models::{
    DashboardStats, Document, DocumentDetail, DocumentKind, DocumentStatus, DocumentSummary, InvoiceData,
    StatusCount, User,
};
use crate::services::approvals::approval_summary;
use crate::utils::{format_decimal, now_rfc3339, parse_decimal};

/// Loads a document of the user's own company. Rows of other companies look
/// missing, whatever the user's role.
pub fn visible_document(db: &Database, user: &User, id: &str) -> Result<Document> {
    db.get_document(id)?
        .filter(|document| document.company_id == user.company_id)
        .ok_or_else(|| AppError::NotFound(format!("document {} not found", id)))
}

pub fn list_documents(
    db: &Database,
    user: &User,
    kind: Option<DocumentKind>,
    status: Option<DocumentStatus>,
) -> Result<Vec<DocumentSummary>> {
    let documents = db.list_documents(&user.company_id, kind, status)?;
    Ok(documents.iter().map(DocumentSummary::from).collect())
}

pub fn document_detail(db: &Database, user: &User, id: &str) -> Result<DocumentDetail> {
    let document = visible_document(db, user, id)?;
    let approvals = db.list_approvals(&document.id)?;
    let logs = db.get_processing_logs(&document.id)?;
    Ok(DocumentDetail {
        approval_summary: approval_summary(&approvals),
        document,
        approvals,
        logs,
    })
}

/// Reviewer correction of extracted fields. Only records under review are editable.
pub fn update_document_data(db: &Database, user: &User, id: &str, data: InvoiceData) -> Result<Document> {
    let document = visible_document(db, user, id)?;
    if document.status != DocumentStatus::ForReview {
        return Err(AppError::Conflict(format!(
            "document {} is {} and can no longer be edited",
            id, document.status
        )));
    }

    let data = normalize_amounts(data)?;
    db.update_document_data(id, &data, &now_rfc3339())?;
    db.log_processing(Some(id), Some(&document.file_hash), "review", "updated", None)?;
    info!(document_id = %id, user_id = %user.id, "document data updated");
    visible_document(db, user, id)
}

/// Reviewer driven status change. PROCESSED is reserved for ledger submission.
pub fn set_document_status(db: &Database, user: &User, id: &str, status: DocumentStatus) -> Result<Document> {
    let document = visible_document(db, user, id)?;
    if status == DocumentStatus::Processed {
        return Err(AppError::Conflict(format!(
            "document {} can only become PROCESSED by submitting it to the ledger",
            id
        )));
    }
    let next = document.status.transition(status)?;
    if next == DocumentStatus::ForReview && document.data.is_none() {
        return Err(AppError::Conflict(format!("document {} has no extracted data yet", id)));
    }

    db.update_document_status(id, next, &now_rfc3339())?;
    db.log_processing(
        Some(id),
        Some(&document.file_hash),
        "status",
        next.as_str(),
        Some(&format!("{} -> {}", document.status, next)),
    )?;
    info!(document_id = %id, from = %document.status, to = %next, "document status changed");
    visible_document(db, user, id)
}

pub fn delete_documents(db: &Database, user: &User, ids: &[String]) -> Result<usize> {
    if ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".to_string()));
    }
    let deleted = db.delete_documents(&user.company_id, ids)?;
    info!(company_id = %user.company_id, requested = ids.len(), deleted, "documents deleted");
    Ok(deleted)
}

pub fn dashboard(db: &Database, user: &User, now: DateTime<Utc>) -> Result<DashboardStats> {
    let documents = db.list_documents(&user.company_id, None, None)?;

    let counted: HashMap<DocumentStatus, usize> = db.count_by_status(&user.company_id)?.into_iter().collect();
    let counts = DocumentStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: counted.get(&status).copied().unwrap_or(0),
        })
        .collect();

    let mut open = Decimal::ZERO;
    let mut processed = Decimal::ZERO;
    let mut by_month: HashMap<String, Decimal> = HashMap::new();
    for document in &documents {
        let amount = total_amount(document);
        match document.status {
            DocumentStatus::ForReview | DocumentStatus::Approved => open += amount,
            DocumentStatus::Processed => processed += amount,
            DocumentStatus::Unprocessed => {}
        }
        *by_month.entry(document_month(document)).or_default() += amount;
    }

    let (chart_months, chart_totals) = build_chart_series(&by_month, now)?;

    Ok(DashboardStats {
        counts,
        open_amount: format_decimal(open),
        processed_amount: format_decimal(processed),
        recent: documents.iter().take(5).map(DocumentSummary::from).collect(),
        chart_months,
        chart_totals,
    })
}

fn build_chart_series(
    by_month: &HashMap<String, Decimal>,
    now: DateTime<Utc>,
) -> Result<(Vec<String>, Vec<String>)> {
    let base_date = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .ok_or_else(|| AppError::Internal("Invalid date".to_string()))?;

    let mut months = Vec::new();
    let mut totals = Vec::new();
    for offset in (0..12).rev() {
        let date = base_date
            .checked_sub_months(Months::new(offset))
            .ok_or_else(|| AppError::Internal("Invalid date".to_string()))?;
        let ym = format!("{}-{:02}", date.year(), date.month());
        totals.push(format_decimal(by_month.get(&ym).copied().unwrap_or_default()));
        months.push(ym);
    }
    Ok((months, totals))
}

fn total_amount(document: &Document) -> Decimal {
    document
        .data
        .as_ref()
        .and_then(|data| parse_decimal(&data.total_amount))
        .unwrap_or_default()
}

/// `YYYY-MM` of the invoice date, falling back to the record creation date.
fn document_month(document: &Document) -> String {
    document
        .data
        .as_ref()
        .map(|data| data.date.as_str())
        .filter(|date| date.len() >= 7)
        .unwrap_or(document.created_at.as_str())
        .chars()
        .take(7)
        .collect()
}

fn normalize_amounts(mut data: InvoiceData) -> Result<InvoiceData> {
    data.total_net = normalize_amount("totalNet", &data.total_net)?;
    data.total_tax = normalize_amount("totalTax", &data.total_tax)?;
    data.total_amount = normalize_amount("totalAmount", &data.total_amount)?;
    for item in data.line_items.iter_mut() {
        item.unit_price = normalize_amount("unitPrice", &item.unit_price)?;
        item.total_amount = normalize_amount("lineItems.totalAmount", &item.total_amount)?;
        item.confidence = item.confidence.clamp(0.0, 1.0);
    }
    Ok(data)
}

fn normalize_amount(field: &str, raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Ok("0.00".to_string());
    }
    parse_decimal(raw)
        .map(format_decimal)
        .ok_or_else(|| AppError::BadRequest(format!("{} is not a decimal amount: {}", field, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, Role};
    use crate::testing::{insert_document, seed_company, seed_user};
    use chrono::TimeZone;

    fn extracted(total: &str, date: &str) -> InvoiceData {
        InvoiceData {
            date: date.into(),
            invoice_number: "INV-1".into(),
            total_amount: total.into(),
            ..Default::default()
        }
    }

    #[test]
    fn other_companies_are_invisible() {
        let db = Database::open_in_memory().unwrap();
        let (_, member) = seed_company(&db, "c1", "u1");
        let (_, outsider) = seed_company(&db, "c2", "u2");
        insert_document(&db, "d1", &member, DocumentStatus::Unprocessed, None);

        assert!(visible_document(&db, &member, "d1").is_ok());
        assert!(matches!(
            visible_document(&db, &outsider, "d1"),
            Err(AppError::NotFound(_))
        ));

        for role in [Role::Admin, Role::PlatformAdmin] {
            let founder = seed_user(&db, "c2", &format!("founder-{}", role.as_str()), role);
            assert!(matches!(visible_document(&db, &founder, "d1"), Err(AppError::NotFound(_))));
            assert!(matches!(
                set_document_status(&db, &founder, "d1", DocumentStatus::ForReview),
                Err(AppError::NotFound(_))
            ));
        }
    }

    #[test]
    fn edits_only_while_under_review() {
        let db = Database::open_in_memory().unwrap();
        let (_, user) = seed_company(&db, "c1", "u1");
        insert_document(&db, "d1", &user, DocumentStatus::ForReview, Some(extracted("10", "2024-01-02")));
        insert_document(&db, "d2", &user, DocumentStatus::Approved, Some(extracted("10", "2024-01-02")));

        let edit = InvoiceData {
            total_amount: "1,234.5".into(),
            line_items: vec![LineItem {
                description: "Paper".into(),
                unit_price: "".into(),
                total_amount: "12".into(),
                confidence: 3.0,
                ..Default::default()
            }],
            ..extracted("0", "2024-01-02")
        };
        let updated = update_document_data(&db, &user, "d1", edit.clone()).unwrap();
        let data = updated.data.unwrap();
        assert_eq!(data.total_amount, "1234.50");
        assert_eq!(data.line_items[0].unit_price, "0.00");
        assert_eq!(data.line_items[0].total_amount, "12.00");
        assert_eq!(data.line_items[0].confidence, 1.0);

        assert!(matches!(
            update_document_data(&db, &user, "d2", edit),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn bad_amounts_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (_, user) = seed_company(&db, "c1", "u1");
        insert_document(&db, "d1", &user, DocumentStatus::ForReview, Some(extracted("10", "2024-01-02")));
        assert!(matches!(
            update_document_data(&db, &user, "d1", extracted("ten", "2024-01-02")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn status_changes_follow_the_transition_table() {
        let db = Database::open_in_memory().unwrap();
        let (_, user) = seed_company(&db, "c1", "u1");
        insert_document(&db, "d1", &user, DocumentStatus::ForReview, Some(extracted("10", "2024-01-02")));
        insert_document(&db, "d2", &user, DocumentStatus::Unprocessed, None);

        let approved = set_document_status(&db, &user, "d1", DocumentStatus::Approved).unwrap();
        assert_eq!(approved.status, DocumentStatus::Approved);

        assert!(matches!(
            set_document_status(&db, &user, "d1", DocumentStatus::Unprocessed),
            Err(AppError::InvalidTransition {
                from: DocumentStatus::Approved,
                to: DocumentStatus::Unprocessed
            })
        ));
        assert!(matches!(
            set_document_status(&db, &user, "d2", DocumentStatus::ForReview),
            Err(AppError::Conflict(_))
        ));

        assert!(matches!(
            set_document_status(&db, &user, "d1", DocumentStatus::Processed),
            Err(AppError::Conflict(_))
        ));
        let document = db.get_document("d1").unwrap().unwrap();
        assert_eq!(document.status, DocumentStatus::Approved);
        assert!(document.ledger_ref.is_none());

        let logs = db.get_processing_logs("d1").unwrap();
        assert_eq!(logs.last().unwrap().status, "APPROVED");
    }

    #[test]
    fn dashboard_sums_open_and_processed() {
        let db = Database::open_in_memory().unwrap();
        let (_, user) = seed_company(&db, "c1", "u1");
        insert_document(&db, "d1", &user, DocumentStatus::ForReview, Some(extracted("10.50", "2024-03-04")));
        insert_document(&db, "d2", &user, DocumentStatus::Approved, Some(extracted("4.50", "2024-02-01")));
        insert_document(&db, "d3", &user, DocumentStatus::Processed, Some(extracted("100", "2024-03-20")));
        insert_document(&db, "d4", &user, DocumentStatus::Unprocessed, None);

        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        let stats = dashboard(&db, &user, now).unwrap();

        assert_eq!(stats.open_amount, "15.00");
        assert_eq!(stats.processed_amount, "100.00");
        assert_eq!(stats.counts.len(), 4);
        assert!(stats
            .counts
            .iter()
            .all(|count| count.count == 1));
        assert_eq!(stats.chart_months.len(), 12);
        assert_eq!(stats.chart_months.first().unwrap(), "2023-04");
        assert_eq!(stats.chart_months.last().unwrap(), "2024-03");
        assert_eq!(stats.chart_totals.last().unwrap(), "110.50");
        assert_eq!(stats.chart_totals[10], "4.50");
        assert_eq!(stats.recent.len(), 4);
    }

    #[test]
    fn empty_delete_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (_, user) = seed_company(&db, "c1", "u1");
        assert!(matches!(delete_documents(&db, &user, &[]), Err(AppError::BadRequest(_))));
    }
}
