#![allow(dead_code)]

mod errors;
mod layers;
mod models;
mod routers;
mod services;

use crate::routers::router;
use clap::Parser;
use services::hooks::LogHooks;
use services::states::TuskerState;
use services::states::config::AppConfig;
use services::states::db::UploadStore;
use services::states::db::chunk_store::SqliteChunkStore;
use services::sweeper;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn tracing_init(level: &str) {
    use std::io::stdout;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, Layer};
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(stdout)
        .with_filter(EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt_layer).init();
}

#[derive(clap::Parser, Debug)]
#[clap(name = "tusker", version, about = "tus 1.0.0 resumable upload server")]
pub struct Cli {
    #[clap(short, long, help = "Path to config file", default_value = "tusker.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(&cli.config)?);
    tracing_init(&config.common.log_level);
    let sqlx_opt = SqliteConnectOptions::from_str(&config.db.db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let sqlx_pool = SqlitePoolOptions::new()
        .max_connections(config.db.sqlite_connection_nums)
        .connect_with(sqlx_opt)
        .await?;
    tracing::info!("Preparing to run embedded migrations...");
    sqlx::migrate!("./migrations").run(&sqlx_pool).await?;

    let storage: Arc<dyn UploadStore> = Arc::new(SqliteChunkStore::new(
        sqlx_pool.clone(),
        config.upload.chunk_size,
        config.upload.max_size,
    ));
    let state = Arc::new(TuskerState::new(
        storage.clone(),
        Arc::new(LogHooks),
        config.clone(),
    ));
    let sweeper_handle = sweeper::spawn(
        storage,
        config.upload.expiration_time,
        Duration::from_secs(config.upload.sweep_interval),
    );

    let addr = format!("{}:{}", config.common.host, config.common.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Starting server at {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    sweeper_handle.abort();

    tracing::info!("Trying to close database connections...");
    match tokio::time::timeout(Duration::from_secs(15), sqlx_pool.close()).await {
        Ok(_) => tracing::info!("Database connections closed."),
        Err(_) => tracing::error!("Timed out while closing database connections."),
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(windows)]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("Graceful shutdown is not supported on this platform.");
        futures::future::pending::<()>().await;
    }
    tracing::warn!("Received shutdown signal, shutting down gracefully...");
}
