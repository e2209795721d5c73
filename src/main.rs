//! media-vaultd - operational entry point
//!
//! Loads configuration, initializes logging, opens the record store and
//! runs one synchronization pass. The Discord-facing process embeds the
//! library directly; this binary exists for deployments and cron-style
//! maintenance.

use media_vault::{AppConfig, FileDatabase, FileSynchronizer};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> miette::Result<()> {
    // A .env file is optional; real deployments set the environment.
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    config.ensure_directories().await?;

    let file_appender = tracing_appender::rolling::never(&config.data_dir, "media-vault.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "media-vault starting");

    let db = FileDatabase::open(&config.database_path).await?;

    let synchronizer = FileSynchronizer::new(db, config);
    let report = synchronizer.synchronize().await?;
    info!(
        scanned = report.scanned,
        inserted = report.inserted,
        duplicates = report.duplicates,
        removed = report.removed,
        retained = report.retained,
        "synchronization pass complete"
    );
    Ok(())
}
