use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{ExtractionConfig, ExtractorKind};
use crate::errors::{AppError, Result};
use crate::models::{InvoiceData, LineItem};
use crate::services::ensure_success;
use crate::services::text_extraction::TextExtractor;
use crate::utils::{decimal_from_f64, normalize_date};

/// OCR/LLM service turning a stored document into structured invoice fields.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, file_url: &str, contents: &[u8]) -> Result<InvoiceData>;
}

pub fn build_extractor(http: reqwest::Client, config: &ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.kind {
        ExtractorKind::Mindee => {
            let key = config
                .mindee_api_key
                .clone()
                .ok_or_else(|| AppError::Internal("MINDEE_API_KEY is not set".to_string()))?;
            Ok(Arc::new(MindeeExtractor::new(http, &config.mindee_base_url, key)))
        }
        ExtractorKind::OpenAi => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| AppError::Internal("OPENAI_API_KEY is not set".to_string()))?;
            Ok(Arc::new(OpenAiExtractor::new(http, key, &config.openai_model)))
        }
    }
}

#[derive(Deserialize)]
struct MindeeResponse {
    document: Option<MindeeDocument>,
}

#[derive(Deserialize)]
struct MindeeDocument {
    inference: Option<MindeeInference>,
}

#[derive(Deserialize)]
struct MindeeInference {
    prediction: Option<MindeePrediction>,
}

#[derive(Deserialize, Default)]
struct MindeePrediction {
    #[serde(default)]
    date: TextField,
    #[serde(default)]
    due_date: TextField,
    #[serde(default)]
    invoice_number: TextField,
    #[serde(default)]
    supplier_name: TextField,
    #[serde(default)]
    supplier_address: TextField,
    #[serde(default)]
    customer_name: TextField,
    #[serde(default)]
    customer_address: TextField,
    #[serde(default)]
    locale: Locale,
    #[serde(default)]
    total_net: AmountField,
    #[serde(default)]
    total_tax: AmountField,
    #[serde(default)]
    total_amount: AmountField,
    #[serde(default)]
    line_items: Vec<MindeeLineItem>,
}

#[derive(Deserialize, Default)]
struct TextField {
    value: Option<String>,
}

#[derive(Deserialize, Default)]
struct AmountField {
    value: Option<f64>,
}

#[derive(Deserialize, Default)]
struct Locale {
    currency: Option<String>,
}

#[derive(Deserialize, Default)]
struct MindeeLineItem {
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total_amount: Option<f64>,
    confidence: Option<f64>,
}

pub struct MindeeExtractor {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl MindeeExtractor {
    pub fn new(http: reqwest::Client, endpoint: &str, api_key: String) -> Self {
        MindeeExtractor {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Extractor for MindeeExtractor {
    async fn extract(&self, file_url: &str, contents: &[u8]) -> Result<InvoiceData> {
        // Mindee fetches public https URLs itself; anything else is sent inline.
        let document = if file_url.starts_with("https://") || contents.is_empty() {
            file_url.to_string()
        } else {
            general_purpose::STANDARD.encode(contents)
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&json!({ "document": document }))
            .send()
            .await?;
        let response = ensure_success(response, "mindee").await?;
        let body: MindeeResponse = response.json().await?;
        map_mindee(body)
    }
}

fn map_mindee(response: MindeeResponse) -> Result<InvoiceData> {
    let prediction = response
        .document
        .and_then(|d| d.inference)
        .and_then(|i| i.prediction)
        .ok_or_else(|| AppError::ExtractionFailed("no document inference returned".to_string()))?;

    Ok(InvoiceData {
        date: normalize_date(prediction.date.value),
        due_date: normalize_date(prediction.due_date.value),
        invoice_number: prediction.invoice_number.value.unwrap_or_default(),
        supplier_name: prediction.supplier_name.value.unwrap_or_default(),
        supplier_address: prediction.supplier_address.value.unwrap_or_default(),
        customer_name: prediction.customer_name.value.unwrap_or_default(),
        customer_address: prediction.customer_address.value.unwrap_or_default(),
        currency: prediction.locale.currency.unwrap_or_default(),
        total_net: decimal_from_f64(prediction.total_net.value),
        total_tax: decimal_from_f64(prediction.total_tax.value),
        total_amount: decimal_from_f64(prediction.total_amount.value),
        line_items: prediction
            .line_items
            .into_iter()
            .map(|item| line_item(item.description, item.quantity, item.unit_price, item.total_amount, item.confidence))
            .collect(),
        vendor_ref: None,
    })
}

fn line_item(
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total_amount: Option<f64>,
    confidence: Option<f64>,
) -> LineItem {
    LineItem {
        description: description.unwrap_or_default(),
        quantity: quantity.filter(|q| q.is_finite()).unwrap_or(0.0),
        unit_price: decimal_from_f64(unit_price),
        total_amount: decimal_from_f64(total_amount),
        confidence: confidence.filter(|c| c.is_finite()).unwrap_or(0.0).clamp(0.0, 1.0),
        account_ref: None,
        customer_ref: None,
        billable: false,
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct LlmInvoice {
    invoice_number: Option<String>,
    invoice_date: Option<String>,
    due_date: Option<String>,
    supplier_name: Option<String>,
    supplier_address: Option<String>,
    customer_name: Option<String>,
    customer_address: Option<String>,
    currency: Option<String>,
    total_net: Option<f64>,
    total_tax: Option<f64>,
    total_amount: Option<f64>,
    #[serde(default)]
    line_items: Vec<LlmLineItem>,
}

#[derive(Deserialize)]
struct LlmLineItem {
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total_amount: Option<f64>,
    confidence: Option<f64>,
}

pub struct OpenAiExtractor {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiExtractor {
    pub fn new(http: reqwest::Client, api_key: String, model: &str) -> Self {
        OpenAiExtractor {
            http,
            api_key,
            model: model.to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    async fn call_openai(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            temperature: 0.1,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, "openai").await?;

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .first()
            .ok_or_else(|| AppError::ExtractionFailed("empty completion".to_string()))?
            .message
            .content
            .trim()
            .to_string();
        Ok(content)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, _file_url: &str, contents: &[u8]) -> Result<InvoiceData> {
        let bytes = contents.to_vec();
        let text = tokio::task::spawn_blocking(move || TextExtractor::extract_from_pdf(&bytes))
            .await
            .map_err(|e| AppError::Internal(format!("text extraction task: {}", e)))??;

        let schema = extraction_schema()?;
        let prompt = system_prompt();
        let user = format!("Invoice text:\n{}", text);

        let mut raw = self.call_openai(prompt, &user).await?;
        let mut value = parse_json(&raw);

        if !value.as_ref().map(|v| schema.is_valid(v)).unwrap_or(false) {
            warn!("completion did not match the schema, asking for a repair");
            let fix_prompt = format!(
                "Fix this JSON so that it matches the schema exactly. Output JSON only. JSON:\n{}",
                raw
            );
            raw = self.call_openai(prompt, &fix_prompt).await?;
            value = parse_json(&raw);
        }

        let value = match value {
            Some(value) if schema.is_valid(&value) => value,
            _ => {
                debug!(raw = %raw, "rejected completion");
                return Err(AppError::ExtractionFailed(
                    "completion does not match the invoice schema".to_string(),
                ));
            }
        };

        let parsed: LlmInvoice = serde_json::from_value(value)
            .map_err(|e| AppError::ExtractionFailed(format!("completion shape: {}", e)))?;
        Ok(map_llm(parsed))
    }
}

fn map_llm(invoice: LlmInvoice) -> InvoiceData {
    InvoiceData {
        date: normalize_date(invoice.invoice_date),
        due_date: normalize_date(invoice.due_date),
        invoice_number: invoice.invoice_number.unwrap_or_default(),
        supplier_name: invoice.supplier_name.unwrap_or_default(),
        supplier_address: invoice.supplier_address.unwrap_or_default(),
        customer_name: invoice.customer_name.unwrap_or_default(),
        customer_address: invoice.customer_address.unwrap_or_default(),
        currency: invoice.currency.unwrap_or_default(),
        total_net: decimal_from_f64(invoice.total_net),
        total_tax: decimal_from_f64(invoice.total_tax),
        total_amount: decimal_from_f64(invoice.total_amount),
        line_items: invoice
            .line_items
            .into_iter()
            .map(|item| line_item(item.description, item.quantity, item.unit_price, item.total_amount, item.confidence))
            .collect(),
        vendor_ref: None,
    }
}

fn parse_json(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw).ok()
}

fn extraction_schema() -> Result<JSONSchema> {
    let schema = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["total_amount", "currency", "invoice_date", "line_items"],
        "properties": {
            "invoice_number": {"type": ["string", "null"]},
            "invoice_date": {"type": ["string", "null"]},
            "due_date": {"type": ["string", "null"]},
            "supplier_name": {"type": ["string", "null"]},
            "supplier_address": {"type": ["string", "null"]},
            "customer_name": {"type": ["string", "null"]},
            "customer_address": {"type": ["string", "null"]},
            "currency": {"type": ["string", "null"]},
            "total_net": {"type": ["number", "null"]},
            "total_tax": {"type": ["number", "null"]},
            "total_amount": {"type": ["number", "null"]},
            "line_items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["description", "total_amount"],
                    "properties": {
                        "description": {"type": ["string", "null"]},
                        "quantity": {"type": ["number", "null"]},
                        "unit_price": {"type": ["number", "null"]},
                        "total_amount": {"type": ["number", "null"]},
                        "confidence": {"type": ["number", "null"], "minimum": 0, "maximum": 1}
                    }
                }
            }
        }
    });

    JSONSchema::compile(&schema).map_err(|e| AppError::Internal(format!("Invalid JSON schema: {}", e)))
}

fn system_prompt() -> &'static str {
    r#"You are an accounts-payable extraction system. Return JSON only and match the schema exactly.
Fields:
- invoice_number (string|null)
- invoice_date (YYYY-MM-DD|null)
- due_date (YYYY-MM-DD|null)
- supplier_name, supplier_address (string|null)
- customer_name, customer_address (string|null)
- currency (ISO 4217 code|null)
- total_net, total_tax, total_amount (number|null)
- line_items: array of {description, quantity, unit_price, total_amount, confidence}
  where confidence is your certainty between 0 and 1
"#
}
