use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Mindee,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct NangoConfig {
    pub base_url: String,
    pub secret_key: String,
    pub gmail_integration: String,
    pub quickbooks_integration: String,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub kind: ExtractorKind,
    pub mindee_api_key: Option<String>,
    pub mindee_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

/// Reference ids used on bill lines the reviewer did not assign explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDefaults {
    pub account_ref: String,
    pub customer_ref: Option<String>,
    pub vendor_ref: String,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub lookback_months: u32,
    pub concurrency: usize,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen: String,
    pub database_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_url: String,
    pub nango: NangoConfig,
    pub gmail_base_url: String,
    pub quickbooks_base_url: String,
    pub extraction: ExtractionConfig,
    pub ledger_defaults: LedgerDefaults,
    pub scan: ScanConfig,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let opt = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kind = match get("WORKMAN_EXTRACTOR", "mindee").to_ascii_lowercase().as_str() {
            "mindee" => ExtractorKind::Mindee,
            "openai" => ExtractorKind::OpenAi,
            other => return Err(anyhow!("WORKMAN_EXTRACTOR must be mindee or openai, got {}", other)),
        };

        let concurrency: usize = parse_var("SCAN_CONCURRENCY", &get("SCAN_CONCURRENCY", "4"))?;
        if concurrency == 0 {
            return Err(anyhow!("SCAN_CONCURRENCY must be at least 1"));
        }

        Ok(AppConfig {
            listen: get("WORKMAN_LISTEN", "0.0.0.0:8080"),
            database_path: PathBuf::from(get("WORKMAN_DB", "workman.sqlite")),
            storage_dir: PathBuf::from(get("WORKMAN_STORAGE_DIR", "storage")),
            public_url: get("WORKMAN_PUBLIC_URL", "http://localhost:8080")
                .trim_end_matches('/')
                .to_string(),
            nango: NangoConfig {
                base_url: get("NANGO_BASE_URL", "https://api.nango.dev"),
                secret_key: get("NANGO_SECRET_KEY", ""),
                gmail_integration: get("NANGO_GMAIL_INTEGRATION", "google-mail"),
                quickbooks_integration: get("NANGO_QUICKBOOKS_INTEGRATION", "quickbooks"),
            },
            gmail_base_url: get(
                "GMAIL_BASE_URL",
                "https://gmail.googleapis.com/gmail/v1/users/me",
            ),
            quickbooks_base_url: get("QUICKBOOKS_BASE_URL", "https://quickbooks.api.intuit.com/v3"),
            extraction: ExtractionConfig {
                kind,
                mindee_api_key: opt("MINDEE_API_KEY"),
                mindee_base_url: get(
                    "MINDEE_BASE_URL",
                    "https://api.mindee.net/v1/products/mindee/invoices/v4/predict",
                ),
                openai_api_key: opt("OPENAI_API_KEY"),
                openai_model: get("OPENAI_MODEL", "gpt-4o-mini"),
            },
            ledger_defaults: LedgerDefaults {
                account_ref: get("LEDGER_DEFAULT_ACCOUNT", "7"),
                customer_ref: opt("LEDGER_DEFAULT_CUSTOMER"),
                vendor_ref: get("LEDGER_DEFAULT_VENDOR", "56"),
            },
            scan: ScanConfig {
                lookback_months: parse_var("SCAN_LOOKBACK_MONTHS", &get("SCAN_LOOKBACK_MONTHS", "6"))?,
                concurrency,
                interval_secs: opt("SCAN_INTERVAL_SECS")
                    .map(|raw| parse_var("SCAN_INTERVAL_SECS", &raw))
                    .transpose()?,
            },
            session_ttl_hours: parse_var("SESSION_TTL_HOURS", &get("SESSION_TTL_HOURS", "168"))?,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| anyhow!("{} has an invalid value: {}", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.extraction.kind, ExtractorKind::Mindee);
        assert_eq!(config.scan.lookback_months, 6);
        assert_eq!(config.scan.concurrency, 4);
        assert_eq!(config.scan.interval_secs, None);
        assert_eq!(config.nango.gmail_integration, "google-mail");
        assert!(config.extraction.openai_api_key.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let config = config(&[
            ("WORKMAN_EXTRACTOR", "OpenAI"),
            ("WORKMAN_PUBLIC_URL", "https://workman.example/"),
            ("SCAN_INTERVAL_SECS", "300"),
            ("LEDGER_DEFAULT_CUSTOMER", "12"),
        ])
        .unwrap();
        assert_eq!(config.extraction.kind, ExtractorKind::OpenAi);
        assert_eq!(config.public_url, "https://workman.example");
        assert_eq!(config.scan.interval_secs, Some(300));
        assert_eq!(config.ledger_defaults.customer_ref.as_deref(), Some("12"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(config(&[("SCAN_CONCURRENCY", "many")]).is_err());
        assert!(config(&[("SCAN_CONCURRENCY", "0")]).is_err());
        assert!(config(&[("WORKMAN_EXTRACTOR", "tesseract")]).is_err());
    }
}
