use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Receipt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::Receipt => "receipt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invoice" => Some(DocumentKind::Invoice),
            "receipt" => Some(DocumentKind::Receipt),
            _ => None,
        }
    }
}

/// Processing status of an invoice or receipt.
///
/// Moves strictly forward: `UNPROCESSED -> FOR_REVIEW -> APPROVED -> PROCESSED`.
/// Staying in the same status is allowed so that a record under review can be
/// re-extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Unprocessed,
    ForReview,
    Approved,
    Processed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Unprocessed,
        DocumentStatus::ForReview,
        DocumentStatus::Approved,
        DocumentStatus::Processed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Unprocessed => "UNPROCESSED",
            DocumentStatus::ForReview => "FOR_REVIEW",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Unprocessed, ForReview) | (ForReview, Approved) | (Approved, Processed)
        ) || self == next
    }

    pub fn transition(self, next: DocumentStatus) -> crate::errors::Result<DocumentStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::errors::AppError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice or receipt row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub kind: DocumentKind,
    pub company_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_url: String,
    pub file_hash: String,
    /// `<message id>:<part id>` for documents pulled from the mailbox.
    pub source_key: Option<String>,
    pub email_subject: Option<String>,
    pub email_from: Option<String>,
    pub email_date: Option<String>,
    pub status: DocumentStatus,
    /// Empty until extraction succeeds.
    pub data: Option<InvoiceData>,
    pub ledger_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceData {
    pub date: String,
    pub due_date: String,
    pub invoice_number: String,
    pub supplier_name: String,
    pub supplier_address: String,
    pub customer_name: String,
    pub customer_address: String,
    pub currency: String,
    pub total_net: String,
    pub total_tax: String,
    pub total_amount: String,
    pub line_items: Vec<LineItem>,
    /// Reviewer chosen ledger vendor; the configured default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: String,
    pub total_amount: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub billable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub kind: DocumentKind,
    pub file_name: String,
    pub status: DocumentStatus,
    pub supplier_name: Option<String>,
    pub invoice_date: Option<String>,
    pub total_amount: Option<String>,
    pub created_at: String,
}

impl From<&Document> for DocumentSummary {
    fn from(document: &Document) -> Self {
        DocumentSummary {
            id: document.id.clone(),
            kind: document.kind,
            file_name: document.file_name.clone(),
            status: document.status,
            supplier_name: document.data.as_ref().map(|d| d.supplier_name.clone()),
            invoice_date: document.data.as_ref().map(|d| d.date.clone()),
            total_amount: document.data.as_ref().map(|d| d.total_amount.clone()),
            created_at: document.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDetail {
    pub document: Document,
    pub approvals: Vec<Approval>,
    pub approval_summary: ApprovalSummary,
    pub logs: Vec<ProcessingLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ApprovalStatus::Pending),
            "APPROVED" => Some(ApprovalStatus::Approved),
            "REJECTED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub approvable_id: String,
    pub approver_id: String,
    pub status: ApprovalStatus,
    pub removable: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Outcome of toggling an approver on a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", content = "approval", rename_all = "lowercase")]
pub enum ApprovalState {
    Added(Approval),
    Removed,
    /// The approval is not removable and was left in place.
    Unchanged(Approval),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
    /// Every non-removable approval is APPROVED. Informational only.
    pub all_required_approved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Operator of the installation. Granted from the command line only.
    PlatformAdmin,
    /// Administers their own company.
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PlatformAdmin => "PLATFORM_ADMIN",
            Role::Admin => "ADMIN",
            Role::Member => "MEMBER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PLATFORM_ADMIN" => Some(Role::PlatformAdmin),
            "ADMIN" => Some(Role::Admin),
            "MEMBER" => Some(Role::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub default_approver_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub company_id: String,
    pub role: Role,
    pub created_at: String,
}

impl User {
    /// Admin of their own company. Never grants access to other companies.
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::PlatformAdmin)
    }

    pub fn is_platform_admin(&self) -> bool {
        self.role == Role::PlatformAdmin
    }

    /// Company admin acting on `company_id`.
    pub fn administers(&self, company_id: &str) -> bool {
        self.is_admin() && self.company_id == company_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailIntegration {
    pub company_id: String,
    pub processed_label_id: String,
    pub processed_label_name: String,
    pub ignored_label_id: String,
    pub ignored_label_name: String,
    /// Owner of documents created by background scans.
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub id: String,
    pub document_id: Option<String>,
    pub file_hash: Option<String>,
    pub process_type: String,
    pub status: String,
    pub message: Option<String>,
    pub created_at: String,
}

/// Transient view of a mailbox message; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub date: String,
    pub from: String,
    pub label_ids: Vec<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub part_id: String,
    pub filename: String,
    pub mime_type: String,
    pub attachment_id: Option<String>,
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// One PDF attachment handled during a scan or upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedAttachment {
    pub message_id: Option<String>,
    pub document_id: String,
    pub file_name: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFailure {
    pub message_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub documents: Vec<ExtractedAttachment>,
    pub failures: Vec<MessageFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerResult {
    pub document_id: String,
    pub bill_id: String,
    pub total_amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: DocumentStatus,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub counts: Vec<StatusCount>,
    pub open_amount: String,
    pub processed_amount: String,
    pub recent: Vec<DocumentSummary>,
    pub chart_months: Vec<String>,
    pub chart_totals: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        use DocumentStatus::*;
        assert!(Unprocessed.can_transition_to(ForReview));
        assert!(ForReview.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Processed));
        assert!(ForReview.can_transition_to(ForReview));

        assert!(!Processed.can_transition_to(Unprocessed));
        assert!(!Unprocessed.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(ForReview));
        assert!(!ForReview.can_transition_to(Processed));
    }

    #[test]
    fn transition_reports_both_ends() {
        let err = DocumentStatus::Processed
            .transition(DocumentStatus::Unprocessed)
            .unwrap_err();
        assert_eq!(err.to_string(), "illegal status transition PROCESSED -> UNPROCESSED");
    }

    #[test]
    fn status_wire_names() {
        for status in DocumentStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("DONE"), None);
    }

    #[test]
    fn invoice_data_uses_camel_case() {
        let data = InvoiceData {
            invoice_number: "INV-1".into(),
            total_amount: "10.00".into(),
            line_items: vec![LineItem {
                description: "Widget".into(),
                quantity: 1.0,
                unit_price: "10.00".into(),
                total_amount: "10.00".into(),
                confidence: 0.9,
                ..Default::default()
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["invoiceNumber"], "INV-1");
        assert_eq!(value["totalAmount"], "10.00");
        assert_eq!(value["lineItems"][0]["unitPrice"], "10.00");
        assert!(value.get("vendorRef").is_none());
    }
}
