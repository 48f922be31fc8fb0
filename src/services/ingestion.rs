use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::{AppError, Result};
use crate::models::{
    Company, Document, DocumentKind, DocumentStatus, EmailMessage, ExtractedAttachment, GmailIntegration,
    MessageFailure, ScanReport, User,
};
use crate::services::approvals::assign_default_approvers;
use crate::services::credentials::Provider;
use crate::services::gmail::{
    attachment_name, decode_body, header_value, pdf_parts, scan_query, summarize, BatchModifyRequest, GmailMessage,
    Label, MessagePart,
};
use crate::services::review::visible_document;
use crate::services::state::AppState;
use crate::utils::{is_pdf, looks_like_pdf, new_id, now_rfc3339};

pub const PROCESSED_LABEL: &str = "Workman/Processed";
pub const IGNORED_LABEL: &str = "Workman/Ignored";

const MESSAGE_LIST_LIMIT: usize = 50;

/// Everything a single message task needs, shared across the scan.
struct ScanContext {
    token: String,
    integration: GmailIntegration,
    company: Company,
    owner_id: String,
}

/// A file about to become a document.
struct NewDocument {
    kind: DocumentKind,
    file_name: String,
    bytes: Vec<u8>,
    message_id: Option<String>,
    source_key: Option<String>,
    email_subject: Option<String>,
    email_from: Option<String>,
    email_date: Option<String>,
}

impl NewDocument {
    fn upload(kind: DocumentKind, file_name: &str, bytes: Vec<u8>) -> Self {
        NewDocument {
            kind,
            file_name: file_name.to_string(),
            bytes,
            message_id: None,
            source_key: None,
            email_subject: None,
            email_from: None,
            email_date: None,
        }
    }
}

/// Pulls new PDF attachments from the user's company mailbox.
pub async fn scan_mailbox(state: &AppState, user: &User) -> Result<ScanReport> {
    let integration = gmail_integration(state, &user.company_id)?;
    scan(state, integration, user.id.clone()).await
}

/// Background variant; new documents are owned by whoever set up the mailbox.
pub async fn scan_company(state: &AppState, integration: &GmailIntegration) -> Result<ScanReport> {
    scan(state, integration.clone(), integration.created_by.clone()).await
}

async fn scan(state: &AppState, integration: GmailIntegration, owner_id: String) -> Result<ScanReport> {
    let company_id = integration.company_id.clone();
    let company = state
        .with_db(|db| db.get_company(&company_id))?
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", company_id)))?;
    let token = state.credentials.get_token(Provider::Gmail, &company_id).await?;

    let query = scan_query(&integration, Utc::now(), state.config.scan.lookback_months);
    let message_ids = state.mailbox.list_message_ids(&token, &query).await?;
    info!(company_id = %company_id, messages = message_ids.len(), query = %query, "mailbox scan started");

    let context = Arc::new(ScanContext {
        token,
        integration,
        company,
        owner_id,
    });
    let permits = Arc::new(Semaphore::new(state.config.scan.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for message_id in message_ids.iter().cloned() {
        let state = state.clone();
        let context = context.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = process_message(&state, &context, &message_id).await;
            (message_id, result)
        });
    }

    let mut report = ScanReport {
        scanned: message_ids.len(),
        ..Default::default()
    };
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((message_id, outcome)) => {
                report.documents.extend(outcome.documents);
                if let Some(err) = outcome.error {
                    warn!(message_id = %message_id, error = %err, "message not completed");
                    report.failures.push(MessageFailure {
                        message_id,
                        error: err.to_string(),
                    });
                }
            }
            Err(err) => error!(error = %err, "message task aborted"),
        }
    }
    Ok(report)
}

/// What one message produced. Documents created before an error are kept.
struct MessageOutcome {
    documents: Vec<ExtractedAttachment>,
    error: Option<AppError>,
}

async fn process_message(state: &AppState, context: &ScanContext, message_id: &str) -> MessageOutcome {
    let mut documents = Vec::new();
    let error = ingest_message(state, context, message_id, &mut documents).await.err();
    MessageOutcome { documents, error }
}

async fn ingest_message(
    state: &AppState,
    context: &ScanContext,
    message_id: &str,
    outcomes: &mut Vec<ExtractedAttachment>,
) -> Result<()> {
    let message = state.mailbox.get_message(&context.token, message_id).await?;
    let parts: Vec<MessagePart> = message
        .payload
        .as_ref()
        .map(|payload| pdf_parts(payload).into_iter().cloned().collect())
        .unwrap_or_default();

    if parts.is_empty() {
        debug!(message_id, "no PDF parts, ignoring message");
        return label_message(state, context, message_id, &context.integration.ignored_label_id).await;
    }

    for part in &parts {
        outcomes.push(ingest_part(state, context, &message, part).await?);
    }

    if outcomes.iter().all(|outcome| outcome.status != DocumentStatus::Unprocessed) {
        label_message(state, context, message_id, &context.integration.processed_label_id).await?;
    } else {
        info!(message_id, "message left unlabeled for the next scan");
    }
    Ok(())
}

async fn ingest_part(
    state: &AppState,
    context: &ScanContext,
    message: &GmailMessage,
    part: &MessagePart,
) -> Result<ExtractedAttachment> {
    let source_key = format!("{}:{}", message.id, part.part_id);
    if let Some(existing) = state.with_db(|db| db.get_document_by_source_key(&source_key))? {
        debug!(document_id = %existing.id, source_key = %source_key, "attachment already ingested");
        let bytes = match existing.status {
            DocumentStatus::Unprocessed => state.storage.read_url(&existing.file_url).await?,
            _ => Vec::new(),
        };
        return Ok(attempt_extraction(state, existing, &bytes, Some(message.id.clone())).await);
    }

    let bytes = attachment_bytes(state, context, &message.id, part).await?;
    let headers = message.payload.as_ref();
    let header = |name: &str| headers.and_then(|payload| header_value(payload, name)).map(str::to_string);
    let new = NewDocument {
        kind: DocumentKind::Invoice,
        file_name: attachment_name(part),
        bytes,
        message_id: Some(message.id.clone()),
        source_key: Some(source_key),
        email_subject: header("Subject"),
        email_from: header("From"),
        email_date: header("Date"),
    };
    ingest_bytes(state, &context.company, &context.owner_id, new).await
}

async fn attachment_bytes(
    state: &AppState,
    context: &ScanContext,
    message_id: &str,
    part: &MessagePart,
) -> Result<Vec<u8>> {
    if let Some(attachment_id) = &part.body.attachment_id {
        return state
            .mailbox
            .get_attachment(&context.token, message_id, attachment_id)
            .await;
    }
    match &part.body.data {
        Some(data) => decode_body(data),
        None => Err(AppError::UpstreamUnavailable(format!(
            "part {} of message {} has no body",
            part.part_id, message_id
        ))),
    }
}

async fn label_message(state: &AppState, context: &ScanContext, message_id: &str, label_id: &str) -> Result<()> {
    let request = BatchModifyRequest {
        ids: vec![message_id.to_string()],
        add_label_ids: vec![label_id.to_string()],
        remove_label_ids: Vec::new(),
    };
    state.mailbox.batch_modify(&context.token, &request).await
}

/// Stores the file, creates the document (or finds the one already holding
/// these bytes) and runs extraction.
async fn ingest_bytes(state: &AppState, company: &Company, owner_id: &str, new: NewDocument) -> Result<ExtractedAttachment> {
    let stored = state.storage.store(&company.id, &new.file_name, &new.bytes).await?;
    let message_id = new.message_id.clone();

    let document = state.with_db(|db| -> Result<Document> {
        if let Some(existing) = db.get_document_by_url(&stored.url)? {
            debug!(document_id = %existing.id, "file already stored");
            return Ok(existing);
        }
        let now = now_rfc3339();
        let document = Document {
            id: new_id(),
            kind: new.kind,
            company_id: company.id.clone(),
            owner_id: owner_id.to_string(),
            file_name: new.file_name.clone(),
            file_url: stored.url.clone(),
            file_hash: stored.hash.clone(),
            source_key: new.source_key.clone(),
            email_subject: new.email_subject.clone(),
            email_from: new.email_from.clone(),
            email_date: new.email_date.clone(),
            status: DocumentStatus::Unprocessed,
            data: None,
            ledger_ref: None,
            created_at: now.clone(),
            updated_at: now,
        };
        db.insert_document(&document)?;
        assign_default_approvers(db, company, &document.id)?;
        db.log_processing(
            Some(&document.id),
            Some(&document.file_hash),
            "ingest",
            "success",
            document.source_key.as_deref(),
        )?;
        Ok(document)
    })?;
    info!(document_id = %document.id, file_name = %document.file_name, "document stored");

    Ok(attempt_extraction(state, document, &new.bytes, message_id).await)
}

/// Extraction outcome for a scan or upload. Failures keep the record UNPROCESSED.
async fn attempt_extraction(
    state: &AppState,
    document: Document,
    bytes: &[u8],
    message_id: Option<String>,
) -> ExtractedAttachment {
    let (status, error) = if document.status == DocumentStatus::Unprocessed {
        match run_extraction(state, &document, bytes).await {
            Ok(status) => (status, None),
            Err(err) => (DocumentStatus::Unprocessed, Some(err.to_string())),
        }
    } else {
        (document.status, None)
    };
    ExtractedAttachment {
        message_id,
        document_id: document.id,
        file_name: document.file_name,
        status,
        error,
    }
}

async fn run_extraction(state: &AppState, document: &Document, bytes: &[u8]) -> Result<DocumentStatus> {
    let next = document.status.transition(DocumentStatus::ForReview)?;

    let data = match state.extractor.extract(&document.file_url, bytes).await {
        Ok(data) => data,
        Err(err) => {
            warn!(document_id = %document.id, error = %err, "extraction failed");
            let message = err.to_string();
            state.with_db(|db| {
                db.log_processing(Some(&document.id), Some(&document.file_hash), "extract", "failed", Some(&message))
            })?;
            return Err(err);
        }
    };

    let changed = state.with_db(|db| -> Result<usize> {
        let changed = db.apply_extraction(&document.file_url, &data, &now_rfc3339())?;
        if changed > 0 {
            db.log_processing(Some(&document.id), Some(&document.file_hash), "extract", "success", None)?;
        }
        Ok(changed)
    })?;
    if changed == 0 {
        return Err(AppError::Conflict(format!(
            "document {} left review while it was being extracted",
            document.id
        )));
    }

    info!(
        document_id = %document.id,
        invoice_number = %data.invoice_number,
        total_amount = %data.total_amount,
        "document ready for review"
    );
    Ok(next)
}

/// Manual upload of a single PDF.
pub async fn ingest_upload(
    state: &AppState,
    user: &User,
    kind: DocumentKind,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<ExtractedAttachment> {
    if !looks_like_pdf(&bytes) {
        return Err(AppError::BadRequest(format!("{} is not a PDF", file_name)));
    }
    let company = state
        .with_db(|db| db.get_company(&user.company_id))?
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", user.company_id)))?;
    ingest_bytes(state, &company, &user.id, NewDocument::upload(kind, file_name, bytes)).await
}

/// Re-runs extraction on a stored document and returns it afterwards.
pub async fn extract_document(state: &AppState, user: &User, document_id: &str) -> Result<Document> {
    let document = state.with_db(|db| visible_document(db, user, document_id))?;
    document.status.transition(DocumentStatus::ForReview)?;

    let bytes = state.storage.read_url(&document.file_url).await?;
    run_extraction(state, &document, &bytes).await?;
    state.with_db(|db| visible_document(db, user, document_id))
}

/// Uploads every PDF directly inside `dir` on behalf of `owner`.
pub async fn import_folder(
    state: &AppState,
    owner: &User,
    kind: DocumentKind,
    dir: &Path,
) -> Result<Vec<ExtractedAttachment>> {
    if !dir.is_dir() {
        return Err(AppError::BadRequest(format!("{} is not a directory", dir.display())));
    }
    let entries = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| is_pdf(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<_>>();

    let mut outcomes = Vec::new();
    for path in entries {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());
        let bytes = tokio::fs::read(&path).await?;
        match ingest_upload(state, owner, kind, &file_name, bytes).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => warn!(path = %path.display(), error = %err, "import skipped"),
        }
    }
    info!(dir = %dir.display(), imported = outcomes.len(), "folder imported");
    Ok(outcomes)
}

/// Creates (or adopts) the processed and ignored labels and records the integration.
pub async fn setup_gmail(state: &AppState, user: &User) -> Result<GmailIntegration> {
    if state.with_db(|db| db.get_gmail_integration(&user.company_id))?.is_some() {
        return Err(AppError::Conflict("gmail is already set up for this company".to_string()));
    }
    let token = state.credentials.get_token(Provider::Gmail, &user.company_id).await?;
    let existing = state.mailbox.list_labels(&token).await?;

    let processed = ensure_label(state, &token, &existing, PROCESSED_LABEL).await?;
    let ignored = ensure_label(state, &token, &existing, IGNORED_LABEL).await?;

    let integration = GmailIntegration {
        company_id: user.company_id.clone(),
        processed_label_id: processed.id,
        processed_label_name: processed.name,
        ignored_label_id: ignored.id,
        ignored_label_name: ignored.name,
        created_by: user.id.clone(),
        created_at: now_rfc3339(),
    };
    state.with_db(|db| db.insert_gmail_integration(&integration))?;
    info!(company_id = %user.company_id, "gmail integration created");
    Ok(integration)
}

async fn ensure_label(state: &AppState, token: &str, existing: &[Label], name: &str) -> Result<Label> {
    if let Some(label) = existing.iter().find(|label| label.name == name) {
        return Ok(label.clone());
    }
    state.mailbox.create_label(token, name).await
}

pub async fn list_labels(state: &AppState, user: &User) -> Result<Vec<Label>> {
    let token = state.credentials.get_token(Provider::Gmail, &user.company_id).await?;
    state.mailbox.list_labels(&token).await
}

pub async fn create_label(state: &AppState, user: &User, name: &str) -> Result<Label> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("label name is required".to_string()));
    }
    let token = state.credentials.get_token(Provider::Gmail, &user.company_id).await?;
    state.mailbox.create_label(&token, name.trim()).await
}

/// Header summaries of the first messages matching `query`.
pub async fn list_messages(state: &AppState, user: &User, query: &str) -> Result<Vec<EmailMessage>> {
    let token = state.credentials.get_token(Provider::Gmail, &user.company_id).await?;
    let ids = state.mailbox.list_message_ids(&token, query).await?;
    let mut messages = Vec::new();
    for id in ids.iter().take(MESSAGE_LIST_LIMIT) {
        let message = state.mailbox.get_message(&token, id).await?;
        messages.push(summarize(&message));
    }
    Ok(messages)
}

pub async fn batch_modify(state: &AppState, user: &User, request: &BatchModifyRequest) -> Result<()> {
    if request.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".to_string()));
    }
    let token = state.credentials.get_token(Provider::Gmail, &user.company_id).await?;
    state.mailbox.batch_modify(&token, request).await
}

/// Moves messages out of the scan window without ingesting them.
pub async fn ignore_messages(state: &AppState, user: &User, ids: Vec<String>) -> Result<()> {
    let integration = gmail_integration(state, &user.company_id)?;
    let request = BatchModifyRequest {
        ids,
        add_label_ids: vec![integration.ignored_label_id],
        remove_label_ids: Vec::new(),
    };
    batch_modify(state, user, &request).await
}

fn gmail_integration(state: &AppState, company_id: &str) -> Result<GmailIntegration> {
    state
        .with_db(|db| db.get_gmail_integration(company_id))?
        .ok_or_else(|| AppError::BadRequest("gmail is not set up for this company".to_string()))
}
