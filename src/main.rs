mod cli;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands, ImportArgs, PromoteArgs, ScanArgs, ServeArgs};
use workman::commands;
use workman::config::AppConfig;
use workman::db::Database;
use workman::models::DocumentKind;
use workman::services::credentials::NangoClient;
use workman::services::extraction::build_extractor;
use workman::services::gmail::GmailClient;
use workman::services::{accounts, ingestion};
use workman::services::quickbooks::QuickBooksClient;
use workman::services::state::AppState;
use workman::services::storage::BlobStorage;

fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn build_state(config: AppConfig) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("workman/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let credentials = Arc::new(NangoClient::new(http.clone(), config.nango.clone()));
    let mailbox = Arc::new(GmailClient::new(http.clone(), &config.gmail_base_url));
    let extractor = build_extractor(http.clone(), &config.extraction)?;
    let ledger = Arc::new(QuickBooksClient::new(http, &config.quickbooks_base_url));

    let db = Database::new(config.database_path.clone())
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let storage = BlobStorage::open(&config.storage_dir, &config.public_url)?;

    Ok(AppState::new(db, storage, credentials, mailbox, extractor, ledger, config))
}

async fn serve(state: AppState, args: ServeArgs) -> Result<()> {
    let listen = args.listen.unwrap_or_else(|| state.config.listen.clone());
    let _scan_loop = state.spawn_scan_loop();

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!(listen = %listen, "workman listening");
    axum::serve(listener, commands::router(state)).await?;
    Ok(())
}

async fn scan(state: AppState, args: ScanArgs) -> Result<()> {
    let integration = state
        .with_db(|db| db.get_gmail_integration(&args.company))?
        .ok_or_else(|| anyhow!("gmail is not set up for company {}", args.company))?;
    let report = ingestion::scan_company(&state, &integration).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn import(state: AppState, args: ImportArgs) -> Result<()> {
    let kind = DocumentKind::parse(&args.kind).ok_or_else(|| anyhow!("unknown kind {}", args.kind))?;
    let owner = state
        .with_db(|db| db.get_user(&args.owner))?
        .filter(|owner| owner.company_id == args.company)
        .ok_or_else(|| anyhow!("user {} is not a member of company {}", args.owner, args.company))?;
    let outcomes = ingestion::import_folder(&state, &owner, kind, &args.dir).await?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

fn promote(state: AppState, args: PromoteArgs) -> Result<()> {
    let user = state.with_db(|db| accounts::promote_to_platform_admin(db, &args.user))?;
    println!("{} is now {}", user.email, user.role.as_str());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    init_logger();

    let state = build_state(config)?;

    match cli.command.unwrap_or(Commands::Serve(ServeArgs { listen: None })) {
        Commands::Serve(args) => serve(state, args).await,
        Commands::Scan(args) => scan(state, args).await,
        Commands::Import(args) => import(state, args).await,
        Commands::Promote(args) => promote(state, args),
    }
}
