use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::Result;
use crate::models::{Attachment, EmailMessage, GmailIntegration};
use crate::services::ensure_success;

/// Gmail sends base64url, sometimes padded and sometimes not.
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub label_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchModifyRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub add_label_ids: Vec<String>,
    #[serde(default)]
    pub remove_label_ids: Vec<String>,
}

/// Mailbox REST surface. Every call takes the caller's OAuth token.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn list_message_ids(&self, token: &str, query: &str) -> Result<Vec<String>>;

    async fn get_message(&self, token: &str, message_id: &str) -> Result<GmailMessage>;

    async fn get_attachment(&self, token: &str, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    async fn batch_modify(&self, token: &str, request: &BatchModifyRequest) -> Result<()>;

    async fn list_labels(&self, token: &str) -> Result<Vec<Label>>;

    async fn create_label(&self, token: &str, name: &str) -> Result<Label>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct AttachmentResponse {
    data: String,
}

#[derive(Deserialize)]
struct LabelListResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        GmailClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn list_message_ids(&self, token: &str, query: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(format!("{}/messages", self.base_url))
                .bearer_auth(token)
                .query(&[("q", query), ("maxResults", PAGE_SIZE)]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }
            let response = ensure_success(request.send().await?, "gmail").await?;
            let page: MessageListResponse = response.json().await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(ids)
    }

    async fn get_message(&self, token: &str, message_id: &str) -> Result<GmailMessage> {
        let response = self
            .http
            .get(format!("{}/messages/{}", self.base_url, message_id))
            .bearer_auth(token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let response = ensure_success(response, "gmail").await?;
        Ok(response.json().await?)
    }

    async fn get_attachment(&self, token: &str, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(format!(
                "{}/messages/{}/attachments/{}",
                self.base_url, message_id, attachment_id
            ))
            .bearer_auth(token)
            .send()
            .await?;
        let response = ensure_success(response, "gmail").await?;
        let body: AttachmentResponse = response.json().await?;
        decode_body(&body.data)
    }

    async fn batch_modify(&self, token: &str, request: &BatchModifyRequest) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/messages/batchModify", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        ensure_success(response, "gmail").await?;
        Ok(())
    }

    async fn list_labels(&self, token: &str) -> Result<Vec<Label>> {
        let response = self
            .http
            .get(format!("{}/labels", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let response = ensure_success(response, "gmail").await?;
        let body: LabelListResponse = response.json().await?;
        Ok(body.labels)
    }

    async fn create_label(&self, token: &str, name: &str) -> Result<Label> {
        let response = self
            .http
            .post(format!("{}/labels", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "labelListVisibility": "labelShow",
                "messageListVisibility": "show",
            }))
            .send()
            .await?;
        let response = ensure_success(response, "gmail").await?;
        Ok(response.json().await?)
    }
}

/// Search filter for messages that still need scanning.
pub fn scan_query(integration: &GmailIntegration, now: DateTime<Utc>, lookback_months: u32) -> String {
    let since = now
        .checked_sub_months(Months::new(lookback_months))
        .unwrap_or(now);
    format!(
        "has:attachment filename:pdf in:inbox after:{} -label:{} -label:{}",
        since.format("%Y/%m/%d"),
        label_search_name(&integration.processed_label_name),
        label_search_name(&integration.ignored_label_name)
    )
}

/// Gmail search addresses nested labels with `-` in place of `/` and spaces.
pub fn label_search_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c.is_whitespace() { '-' } else { c })
        .collect()
}

pub fn header_value<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

/// Depth-first walk of the MIME tree collecting PDF parts.
pub fn pdf_parts(part: &MessagePart) -> Vec<&MessagePart> {
    let mut found = Vec::new();
    collect_pdf_parts(part, &mut found);
    found
}

fn collect_pdf_parts<'a>(part: &'a MessagePart, found: &mut Vec<&'a MessagePart>) {
    if is_pdf_part(part) {
        found.push(part);
    }
    for child in &part.parts {
        collect_pdf_parts(child, found);
    }
}

fn is_pdf_part(part: &MessagePart) -> bool {
    let mime = part.mime_type.to_ascii_lowercase();
    if mime == "application/pdf" {
        return true;
    }
    mime == "application/octet-stream" && part.filename.to_ascii_lowercase().ends_with(".pdf")
}

pub fn decode_body(data: &str) -> Result<Vec<u8>> {
    Ok(GMAIL_BASE64.decode(data.trim())?)
}

/// Headers and attachment list of a fetched message; attachment bodies are not loaded.
pub fn summarize(message: &GmailMessage) -> EmailMessage {
    let (subject, date, from, attachments) = match &message.payload {
        Some(payload) => (
            header_value(payload, "Subject").unwrap_or_default().to_string(),
            header_value(payload, "Date").unwrap_or_default().to_string(),
            header_value(payload, "From").unwrap_or_default().to_string(),
            pdf_parts(payload)
                .into_iter()
                .map(|part| Attachment {
                    part_id: part.part_id.clone(),
                    filename: attachment_name(part),
                    mime_type: part.mime_type.clone(),
                    attachment_id: part.body.attachment_id.clone(),
                    data: Vec::new(),
                })
                .collect(),
        ),
        None => (String::new(), String::new(), String::new(), Vec::new()),
    };
    EmailMessage {
        id: message.id.clone(),
        subject,
        date,
        from,
        label_ids: message.label_ids.clone(),
        attachments,
    }
}

pub fn attachment_name(part: &MessagePart) -> String {
    if part.filename.trim().is_empty() {
        format!("attachment-{}.pdf", part.part_id)
    } else {
        part.filename.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn part(part_id: &str, mime: &str, filename: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            part_id: part_id.into(),
            mime_type: mime.into(),
            filename: filename.into(),
            headers: vec![],
            body: PartBody {
                attachment_id: Some(format!("att-{}", part_id)),
                size: 10,
                data: None,
            },
            parts,
        }
    }

    fn integration() -> GmailIntegration {
        GmailIntegration {
            company_id: "c1".into(),
            processed_label_id: "Label_1".into(),
            processed_label_name: "Workman/Processed".into(),
            ignored_label_id: "Label_2".into(),
            ignored_label_name: "Workman/Ignored".into(),
            created_by: "u1".into(),
            created_at: String::new(),
        }
    }

    #[test]
    fn query_excludes_labelled_messages_and_limits_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let query = scan_query(&integration(), now, 6);
        assert_eq!(
            query,
            "has:attachment filename:pdf in:inbox after:2023/11/20 -label:Workman-Processed -label:Workman-Ignored"
        );
    }

    #[test]
    fn nested_pdf_parts_are_found() {
        let tree = part(
            "",
            "multipart/mixed",
            "",
            vec![
                part("0", "multipart/alternative", "", vec![part("0.0", "text/plain", "", vec![])]),
                part("1", "application/pdf", "invoice.pdf", vec![]),
                part(
                    "2",
                    "multipart/mixed",
                    "",
                    vec![
                        part("2.0", "application/octet-stream", "Receipt.PDF", vec![]),
                        part("2.1", "image/png", "logo.png", vec![]),
                    ],
                ),
            ],
        );
        let ids: Vec<&str> = pdf_parts(&tree).iter().map(|p| p.part_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2.0"]);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut payload = part("", "multipart/mixed", "", vec![]);
        payload.headers = vec![
            Header { name: "subject".into(), value: "Invoice 42".into() },
            Header { name: "FROM".into(), value: "billing@vendor.test".into() },
        ];
        assert_eq!(header_value(&payload, "Subject"), Some("Invoice 42"));
        assert_eq!(header_value(&payload, "From"), Some("billing@vendor.test"));
        assert_eq!(header_value(&payload, "Date"), None);
    }

    #[test]
    fn base64url_with_and_without_padding() {
        assert_eq!(decode_body("JVBERi0").unwrap(), b"%PDF-");
        assert_eq!(decode_body("JVBERi0=").unwrap(), b"%PDF-");
        assert_eq!(decode_body("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_body("***").is_err());
    }

    #[test]
    fn summary_lists_attachments() {
        let mut payload = part("", "multipart/mixed", "", vec![part("1", "application/pdf", "", vec![])]);
        payload.headers = vec![Header { name: "Subject".into(), value: "Bill".into() }];
        let message = GmailMessage {
            id: "18f96ff8fa0fb86d".into(),
            label_ids: vec!["INBOX".into()],
            snippet: String::new(),
            payload: Some(payload),
        };
        let summary = summarize(&message);
        assert_eq!(summary.subject, "Bill");
        assert_eq!(summary.attachments.len(), 1);
        assert_eq!(summary.attachments[0].filename, "attachment-1.pdf");
        assert_eq!(summary.attachments[0].attachment_id.as_deref(), Some("att-1"));
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn message_ids_follow_next_page_token() {
        use std::collections::HashMap;

        use axum::extract::Query;
        use axum::routing::get;
        use axum::Json;

        let router = axum::Router::new().route(
            "/messages",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("q").map(String::as_str), Some("has:attachment"));
                let page = match params.get("pageToken").map(String::as_str) {
                    None => json!({ "messages": [{ "id": "m1" }, { "id": "m2" }], "nextPageToken": "p2" }),
                    Some("p2") => json!({ "messages": [{ "id": "m3" }], "nextPageToken": "p3" }),
                    _ => json!({ "nextPageToken": "" }),
                };
                Json(page)
            }),
        );
        let client = GmailClient::new(reqwest::Client::new(), &serve(router).await);

        let ids = client.list_message_ids("token", "has:attachment").await.unwrap();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn rate_limited_reads_are_upstream_failures() {
        use axum::http::StatusCode;
        use axum::routing::get;

        use crate::errors::AppError;

        let router = axum::Router::new()
            .route(
                "/messages/busy",
                get(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        r#"{"error":{"code":403,"errors":[{"reason":"rateLimitExceeded"}]}}"#,
                    )
                }),
            )
            .route(
                "/messages/denied",
                get(|| async { (StatusCode::FORBIDDEN, r#"{"error":{"status":"PERMISSION_DENIED"}}"#) }),
            );
        let client = GmailClient::new(reqwest::Client::new(), &serve(router).await);

        let err = client.get_message("token", "busy").await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        let err = client.get_message("token", "denied").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
