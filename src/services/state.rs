use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info};

use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{AppError, Result};
use crate::services::credentials::CredentialStore;
use crate::services::extraction::Extractor;
use crate::services::gmail::Mailbox;
use crate::services::ingestion;
use crate::services::quickbooks::Ledger;
use crate::services::storage::BlobStorage;

/// Process-wide handles, built once in `main` and cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub storage: Arc<BlobStorage>,
    pub credentials: Arc<dyn CredentialStore>,
    pub mailbox: Arc<dyn Mailbox>,
    pub extractor: Arc<dyn Extractor>,
    pub ledger: Arc<dyn Ledger>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: Database,
        storage: BlobStorage,
        credentials: Arc<dyn CredentialStore>,
        mailbox: Arc<dyn Mailbox>,
        extractor: Arc<dyn Extractor>,
        ledger: Arc<dyn Ledger>,
        config: AppConfig,
    ) -> Self {
        AppState {
            db: Arc::new(Mutex::new(db)),
            storage: Arc::new(storage),
            credentials,
            mailbox,
            extractor,
            ledger,
            config: Arc::new(config),
        }
    }

    /// Runs `f` under the database lock. The guard never lives across an await.
    pub fn with_db<T, E>(&self, f: impl FnOnce(&Database) -> std::result::Result<T, E>) -> Result<T>
    where
        AppError: From<E>,
    {
        let db = self
            .db
            .lock()
            .map_err(|_| AppError::Internal("DB lock poisoned".to_string()))?;
        Ok(f(&db)?)
    }

    /// Scans every connected mailbox once.
    pub async fn enqueue_scan(&self) -> Result<()> {
        let integrations = self.with_db(|db| db.list_gmail_integrations())?;
        for integration in integrations {
            let company_id = integration.company_id.clone();
            match ingestion::scan_company(self, &integration).await {
                Ok(report) => info!(
                    company_id = %company_id,
                    scanned = report.scanned,
                    documents = report.documents.len(),
                    failures = report.failures.len(),
                    "mailbox scan finished"
                ),
                Err(err) => error!(company_id = %company_id, error = %err, "mailbox scan failed"),
            }
        }
        Ok(())
    }

    /// Background rescan when `SCAN_INTERVAL_SECS` is configured.
    pub fn spawn_scan_loop(&self) -> Option<tokio::task::JoinHandle<()>> {
        let secs = self.config.scan.interval_secs?;
        let state = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
            loop {
                ticker.tick().await;
                if let Err(err) = state.enqueue_scan().await {
                    error!(error = %err, "scheduled scan failed");
                }
            }
        }))
    }
}
