//! Fakes for the external collaborators and a ready-made [`AppState`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, Result};
use crate::models::{Company, Document, DocumentKind, DocumentStatus, InvoiceData, LineItem, Role, User};
use crate::services::credentials::{ConnectionMetadata, CredentialStore, Provider};
use crate::services::crypto::CryptoService;
use crate::services::extraction::Extractor;
use crate::services::gmail::{
    label_search_name, BatchModifyRequest, GmailMessage, Header, Label, Mailbox, MessagePart, PartBody,
};
use crate::services::quickbooks::{BillPayload, Ledger, LedgerCredentials};
use crate::services::state::AppState;
use crate::services::storage::BlobStorage;
use crate::utils::now_rfc3339;

pub const PUBLIC_URL: &str = "http://localhost:8080";

pub struct MockCredentials {
    connected: AtomicBool,
}

impl MockCredentials {
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn check(&self, provider: Provider, owner_id: &str) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "{} is not connected for {}",
                provider.as_str(),
                owner_id
            )))
        }
    }
}

#[async_trait]
impl CredentialStore for MockCredentials {
    async fn get_token(&self, provider: Provider, owner_id: &str) -> Result<String> {
        self.check(provider, owner_id)?;
        Ok(format!("{}-token", provider.as_str()))
    }

    async fn get_connection_metadata(&self, provider: Provider, owner_id: &str) -> Result<ConnectionMetadata> {
        self.check(provider, owner_id)?;
        Ok(ConnectionMetadata {
            connection_id: owner_id.to_string(),
            realm_id: Some("realm-1".to_string()),
        })
    }

    async fn create_connect_session(&self, provider: Provider, owner_id: &str) -> Result<String> {
        Ok(format!("session-{}-{}", provider.as_str(), owner_id))
    }
}

/// In-memory mailbox that honours `-label:` exclusions in search queries.
#[derive(Default)]
pub struct MockMailbox {
    messages: Mutex<Vec<GmailMessage>>,
    attachments: Mutex<HashMap<(String, String), Vec<u8>>>,
    labels: Mutex<Vec<Label>>,
    latency_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    refuse_labels: AtomicBool,
}

impl MockMailbox {
    /// Makes every `get_message` take `ms` milliseconds.
    pub fn set_latency(&self, ms: u64) {
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Highest number of `get_message` calls seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_labels(&self) {
        self.refuse_labels.store(true, Ordering::SeqCst);
    }

    pub fn add_message(&self, message: GmailMessage, attachments: &[(&str, Vec<u8>)]) {
        let mut stored = self.attachments.lock().unwrap();
        for (attachment_id, bytes) in attachments {
            stored.insert((message.id.clone(), attachment_id.to_string()), bytes.clone());
        }
        self.messages.lock().unwrap().push(message);
    }

    pub fn has_label(&self, message_id: &str, label_id: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.id == message_id && message.label_ids.iter().any(|id| id == label_id))
    }
}

#[async_trait]
impl Mailbox for MockMailbox {
    async fn list_message_ids(&self, _token: &str, query: &str) -> Result<Vec<String>> {
        let excluded: Vec<String> = self
            .labels
            .lock()
            .unwrap()
            .iter()
            .filter(|label| query.contains(&format!("-label:{}", label_search_name(&label.name))))
            .map(|label| label.id.clone())
            .collect();
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|message| !message.label_ids.iter().any(|id| excluded.contains(id)))
            .map(|message| message.id.clone())
            .collect())
    }

    async fn get_message(&self, _token: &str, message_id: &str) -> Result<GmailMessage> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let message = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|message| message.id == message_id)
            .cloned();
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        message.ok_or_else(|| AppError::UpstreamUnavailable(format!("gmail error 404: {}", message_id)))
    }

    async fn get_attachment(&self, _token: &str, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        self.attachments
            .lock()
            .unwrap()
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| AppError::UpstreamUnavailable(format!("gmail error 404: {}", attachment_id)))
    }

    async fn batch_modify(&self, _token: &str, request: &BatchModifyRequest) -> Result<()> {
        if self.refuse_labels.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable("gmail error 503: backend error".to_string()));
        }
        let mut messages = self.messages.lock().unwrap();
        for message in messages.iter_mut().filter(|m| request.ids.contains(&m.id)) {
            for label in &request.add_label_ids {
                if !message.label_ids.contains(label) {
                    message.label_ids.push(label.clone());
                }
            }
            message.label_ids.retain(|label| !request.remove_label_ids.contains(label));
        }
        Ok(())
    }

    async fn list_labels(&self, _token: &str) -> Result<Vec<Label>> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, _token: &str, name: &str) -> Result<Label> {
        let mut labels = self.labels.lock().unwrap();
        if labels.iter().any(|label| label.name == name) {
            return Err(AppError::UpstreamUnavailable(format!("gmail error 409: {} exists", name)));
        }
        let label = Label {
            id: format!("Label_{}", labels.len() + 1),
            name: name.to_string(),
            label_type: Some("user".to_string()),
        };
        labels.push(label.clone());
        Ok(label)
    }
}

/// Returns [`fixture_invoice`] unless the document contains the failure marker.
pub struct MockExtractor {
    fail_marker: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn fail_on(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn succeed(&self) {
        *self.fail_marker.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _file_url: &str, contents: &[u8]) -> Result<InvoiceData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let marker = self.fail_marker.lock().unwrap().clone();
        if let Some(marker) = marker {
            if contents.windows(marker.len()).any(|window| window == marker.as_bytes()) {
                return Err(AppError::ExtractionFailed("no document inference returned".to_string()));
            }
        }
        Ok(fixture_invoice())
    }
}

#[derive(Default)]
pub struct MockLedger {
    bill_calls: AtomicUsize,
    fail: AtomicBool,
    queries: Mutex<Vec<String>>,
}

impl MockLedger {
    pub fn fail_bills(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn bill_calls(&self) -> usize {
        self.bill_calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<String> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn query(&self, _credentials: &LedgerCredentials, query: &str) -> Result<Value> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(json!({
            "Vendor": [{ "Id": "56", "DisplayName": "Paper Supply Co" }],
            "Customer": [{ "Id": "3", "DisplayName": "Acme Project" }],
            "Account": [{ "Id": "7", "Name": "Office Supplies" }],
            "startPosition": 1,
            "maxResults": 1
        }))
    }

    async fn create_bill(&self, _credentials: &LedgerCredentials, bill: &BillPayload) -> Result<Value> {
        let n = self.bill_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable(
                "quickbooks error 400 Bad Request: ValidationFault".to_string(),
            ));
        }
        Ok(json!({ "Id": format!("bill-{}", n), "VendorRef": bill.vendor_ref }))
    }

    async fn get_vendor(&self, _credentials: &LedgerCredentials, vendor_id: &str) -> Result<Value> {
        Ok(json!({ "Id": vendor_id, "DisplayName": "Paper Supply Co" }))
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub credentials: Arc<MockCredentials>,
    pub mailbox: Arc<MockMailbox>,
    pub extractor: Arc<MockExtractor>,
    pub ledger: Arc<MockLedger>,
    _storage_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::from_lookup(|_| None).unwrap())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let storage_dir = tempfile::tempdir().unwrap();
        let storage = BlobStorage::open(storage_dir.path(), PUBLIC_URL).unwrap();

        let credentials = Arc::new(MockCredentials {
            connected: AtomicBool::new(true),
        });
        let mailbox = Arc::new(MockMailbox::default());
        let extractor = Arc::new(MockExtractor {
            fail_marker: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        let ledger = Arc::new(MockLedger::default());

        let state = AppState::new(
            Database::open_in_memory().unwrap(),
            storage,
            credentials.clone(),
            mailbox.clone(),
            extractor.clone(),
            ledger.clone(),
            config,
        );
        TestHarness {
            state,
            credentials,
            mailbox,
            extractor,
            ledger,
            _storage_dir: storage_dir,
        }
    }

    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let db = self.state.db.lock().unwrap();
        f(&db)
    }

    /// Bearer token of a fresh session for `user`.
    pub fn login(&self, user: &User) -> String {
        let token = CryptoService::new_session_token().unwrap();
        let expires_at = (Utc::now() + Duration::hours(1)).to_rfc3339();
        self.with_db(|db| {
            db.insert_session(&CryptoService::token_digest(&token), &user.id, &expires_at, &now_rfc3339())
                .unwrap()
        });
        token
    }
}

/// Company `company_id` with one member `user_id`.
pub fn seed_company(db: &Database, company_id: &str, user_id: &str) -> (Company, User) {
    let company = Company {
        id: company_id.to_string(),
        name: format!("Company {}", company_id),
        default_approver_ids: Vec::new(),
        created_at: now_rfc3339(),
    };
    db.insert_company(&company).unwrap();
    let user = seed_user(db, company_id, user_id, Role::Member);
    (company, user)
}

pub fn seed_user(db: &Database, company_id: &str, user_id: &str, role: Role) -> User {
    let user = User {
        id: user_id.to_string(),
        email: format!("{}@{}.test", user_id, company_id),
        name: user_id.to_string(),
        company_id: company_id.to_string(),
        role,
        created_at: now_rfc3339(),
    };
    db.insert_user(&user, "pbkdf2$1$AAAA$AAAA").unwrap();
    user
}

pub fn insert_document(
    db: &Database,
    id: &str,
    owner: &User,
    status: DocumentStatus,
    data: Option<InvoiceData>,
) -> Document {
    let now = now_rfc3339();
    let document = Document {
        id: id.to_string(),
        kind: DocumentKind::Invoice,
        company_id: owner.company_id.clone(),
        owner_id: owner.id.clone(),
        file_name: format!("{}.pdf", id),
        file_url: format!("{}/files/{}/{}.pdf", PUBLIC_URL, owner.company_id, id),
        file_hash: format!("hash-{}", id),
        source_key: None,
        email_subject: None,
        email_from: None,
        email_date: None,
        status,
        data,
        ledger_ref: None,
        created_at: now.clone(),
        updated_at: now,
    };
    db.insert_document(&document).unwrap();
    document
}

pub fn fixture_pdf(marker: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% fixture {}\n%%EOF\n", marker).into_bytes()
}

pub fn fixture_invoice() -> InvoiceData {
    InvoiceData {
        date: "2024-03-01".to_string(),
        due_date: "2024-03-31".to_string(),
        invoice_number: "INV-001".to_string(),
        supplier_name: "Paper Supply Co".to_string(),
        customer_name: "Acme".to_string(),
        currency: "USD".to_string(),
        total_net: "100.00".to_string(),
        total_tax: "7.50".to_string(),
        total_amount: "107.50".to_string(),
        line_items: vec![
            LineItem {
                description: "Copy paper".to_string(),
                quantity: 5.0,
                unit_price: "20.00".to_string(),
                total_amount: "100.00".to_string(),
                confidence: 0.97,
                ..Default::default()
            },
            LineItem {
                description: "Delivery".to_string(),
                quantity: 1.0,
                unit_price: "7.50".to_string(),
                total_amount: "7.50".to_string(),
                confidence: 0.88,
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

/// Multipart message with a text body and one PDF attachment (`att-1`).
pub fn fixture_message(id: &str) -> GmailMessage {
    let header = |name: &str, value: &str| Header {
        name: name.to_string(),
        value: value.to_string(),
    };
    GmailMessage {
        id: id.to_string(),
        label_ids: vec!["INBOX".to_string()],
        snippet: "Please find attached".to_string(),
        payload: Some(MessagePart {
            part_id: String::new(),
            mime_type: "multipart/mixed".to_string(),
            headers: vec![
                header("subject", &format!("Invoice {}", id)),
                header("From", "billing@vendor.test"),
                header("Date", "Tue, 4 Jun 2024 10:00:00 +0000"),
            ],
            parts: vec![
                MessagePart {
                    part_id: "0".to_string(),
                    mime_type: "text/plain".to_string(),
                    body: PartBody {
                        data: Some("UGxlYXNlIGZpbmQgYXR0YWNoZWQ".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                MessagePart {
                    part_id: "1".to_string(),
                    mime_type: "application/pdf".to_string(),
                    filename: format!("invoice-{}.pdf", id),
                    body: PartBody {
                        attachment_id: Some("att-1".to_string()),
                        size: 64,
                        data: None,
                    },
                    ..Default::default()
                },
            ],
            ..Default::default()
        }),
    }
}
