use std::sync::Arc;

use clap::Parser;
use cronix_core::config::CronixConfig;
use cronix_scheduler::{Executor, JobService, JobStore, Scheduler, SqliteStore};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "cronix-daemon", version, about = "Runs scheduled HTTP jobs")]
struct Cli {
    /// Path to cronix.toml (default: ~/.cronix/cronix.toml)
    #[arg(long, env = "CRONIX_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronix_daemon=info,cronix_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > CRONIX_CONFIG env > ~/.cronix/cronix.toml
    let config = CronixConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CronixConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(SqliteStore::new(db)?);

    let executor = Arc::new(Executor::new(store.clone(), &config.scheduler)?);
    let scheduler = Arc::new(Scheduler::new(executor, &config.scheduler));
    let service = JobService::new(store.clone(), store.clone(), Arc::clone(&scheduler));

    // history may have outgrown a lowered keep-count while we were down
    match service.cleanup_all_logs().await {
        Ok(removed) if removed > 0 => info!(removed, "trimmed job logs at startup"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "startup log cleanup failed"),
    }

    let jobs = store.list_active_jobs().await?;
    info!(active = jobs.len(), "loaded active jobs");
    scheduler.start(jobs)?;

    shutdown_signal().await;
    info!("shutdown signal received");
    scheduler.stop();
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
