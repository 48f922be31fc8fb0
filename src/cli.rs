use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "workman")]
#[command(about = "Invoice and receipt intake from Gmail to QuickBooks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve(ServeArgs),
    /// Scan one company's mailbox once and exit
    Scan(ScanArgs),
    /// Ingest every PDF in a local folder
    Import(ImportArgs),
    /// Grant the platform admin role to an existing user
    Promote(PromoteArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Overrides WORKMAN_LISTEN
    #[arg(long)]
    pub listen: Option<String>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[arg(long)]
    pub company: String,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    pub dir: PathBuf,
    #[arg(long)]
    pub company: String,
    /// User who will own the imported documents
    #[arg(long)]
    pub owner: String,
    /// invoice or receipt
    #[arg(long, default_value = "invoice")]
    pub kind: String,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    #[arg(long)]
    pub user: String,
}
