use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Two-place decimal string; `"0.00"` for missing or non-finite input.
pub fn decimal_from_f64(value: Option<f64>) -> String {
    value
        .and_then(Decimal::from_f64)
        .map(format_decimal)
        .unwrap_or_else(|| "0.00".to_string())
}

pub fn format_decimal(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Accepts `1234.5`, `1,234.50`, `1234,50` and `1.234,50`. Whichever
/// separator comes last is the decimal one.
pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = match (raw.rfind('.'), raw.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), _) => raw.replace(',', ""),
        (None, Some(_)) => raw.replace(',', "."),
        (None, None) => raw.to_string(),
    };
    Decimal::from_str(&normalized).ok()
}

pub fn normalize_date(value: Option<String>) -> String {
    let raw = match value {
        Some(raw) => raw.trim().to_string(),
        None => return String::new(),
    };
    if raw.is_empty() {
        return raw;
    }

    let formats = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y"];
    for fmt in formats.iter() {
        if let Ok(date) = NaiveDate::parse_from_str(&raw, fmt) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}
