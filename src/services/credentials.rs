use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::NangoConfig;
use crate::errors::{AppError, Result};
use crate::services::ensure_success;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Quickbooks,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Quickbooks => "quickbooks",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gmail" => Some(Provider::Gmail),
            "quickbooks" => Some(Provider::Quickbooks),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub connection_id: String,
    /// QuickBooks company id.
    pub realm_id: Option<String>,
}

/// OAuth token vault keyed by provider and owner (company id).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_token(&self, provider: Provider, owner_id: &str) -> Result<String>;

    async fn get_connection_metadata(&self, provider: Provider, owner_id: &str) -> Result<ConnectionMetadata>;

    /// Starts an OAuth connection; the returned token is handed to the browser.
    async fn create_connect_session(&self, provider: Provider, owner_id: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct NangoConnection {
    connection_id: Option<String>,
    #[serde(default)]
    credentials: NangoCredentials,
    #[serde(default)]
    connection_config: Value,
}

#[derive(Deserialize, Default)]
struct NangoCredentials {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct ConnectSessionResponse {
    data: ConnectSessionData,
}

#[derive(Deserialize)]
struct ConnectSessionData {
    token: String,
}

pub struct NangoClient {
    http: reqwest::Client,
    config: NangoConfig,
}

impl NangoClient {
    pub fn new(http: reqwest::Client, config: NangoConfig) -> Self {
        NangoClient { http, config }
    }

    fn integration_key(&self, provider: Provider) -> &str {
        match provider {
            Provider::Gmail => &self.config.gmail_integration,
            Provider::Quickbooks => &self.config.quickbooks_integration,
        }
    }

    async fn fetch_connection(&self, provider: Provider, owner_id: &str) -> Result<NangoConnection> {
        let url = format!("{}/connection/{}", self.config.base_url, owner_id);
        let response = self
            .http
            .get(url)
            .query(&[("provider_config_key", self.integration_key(provider))])
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(provider = provider.as_str(), owner_id, "no connection in credential store");
            return Err(AppError::Unauthorized(format!(
                "{} is not connected for {}",
                provider.as_str(),
                owner_id
            )));
        }
        let response = ensure_success(response, "nango").await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CredentialStore for NangoClient {
    async fn get_token(&self, provider: Provider, owner_id: &str) -> Result<String> {
        self.fetch_connection(provider, owner_id)
            .await?
            .credentials
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(format!("no {} access token for {}", provider.as_str(), owner_id))
            })
    }

    async fn get_connection_metadata(&self, provider: Provider, owner_id: &str) -> Result<ConnectionMetadata> {
        let connection = self.fetch_connection(provider, owner_id).await?;
        Ok(connection_metadata(connection, owner_id))
    }

    async fn create_connect_session(&self, provider: Provider, owner_id: &str) -> Result<String> {
        let body = json!({
            "end_user": { "id": owner_id },
            "allowed_integrations": [self.integration_key(provider)],
        });
        let response = self
            .http
            .post(format!("{}/connect/sessions", self.config.base_url))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response, "nango").await?;
        let session: ConnectSessionResponse = response.json().await?;
        Ok(session.data.token)
    }
}

fn connection_metadata(connection: NangoConnection, owner_id: &str) -> ConnectionMetadata {
    let realm_id = connection
        .connection_config
        .get("realmId")
        .and_then(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
    ConnectionMetadata {
        connection_id: connection
            .connection_id
            .unwrap_or_else(|| owner_id.to_string()),
        realm_id,
    }
}
