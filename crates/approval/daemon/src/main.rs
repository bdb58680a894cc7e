//! Approval Daemon - Background workflow service
//!
//! The approval daemon provides:
//! - Template seeding from a JSON file at startup
//! - The reminder scan loop (due-soon, overdue, expiry)
//! - Notification dispatch with retry

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod seed;
mod service;

use approval_engine::ApprovalConfig;
use service::ApprovalService;

/// Approval Daemon CLI
#[derive(Parser)]
#[command(name = "approvald")]
#[command(about = "Approval Daemon - HR approval workflow service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPROVAL_CONFIG")]
    config: Option<String>,

    /// Template drafts to publish at startup (JSON array)
    #[arg(short, long, env = "APPROVAL_TEMPLATES")]
    templates: Option<String>,

    /// Log level
    #[arg(long, env = "APPROVAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPROVAL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = ApprovalConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if cli.templates.is_some() {
        config.templates_path = cli.templates;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        scan_interval_secs = config.scheduler.scan_interval_secs,
        "Starting approval daemon"
    );

    let service = ApprovalService::new(config)?;
    service.run().await
}
