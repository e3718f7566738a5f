//! # Francis Sync Daemon
//!
//! Runs the sync engine against SQLite-backed state until interrupted.
//!
//! ## Environment
//! - `RUST_LOG` - log filter (default `info,francis=debug,sqlx=warn`)
//! - `FRANCIS_CONFIG` - config file path (default platform config dir)
//! - `FRANCIS_*` - engine overrides, see `EngineConfig`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use francis_db::{Database, DbConfig};
use francis_sync::{EngineConfig, LogEmitter, Scheduler, SqlitePersistence, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var_os("FRANCIS_CONFIG").map(PathBuf::from);
    let config = EngineConfig::load(config_path).context("loading engine config")?;

    let db_path = config
        .database_path()
        .context("no database path configured and no platform data directory")?;
    info!(path = %db_path.display(), "Opening database");
    let db = Database::new(DbConfig::new(&db_path))
        .await
        .context("opening database")?;

    let engine = SyncEngine::builder(config.clone())
        .with_persistence(Arc::new(SqlitePersistence::new(db.snapshots())))
        .with_emitter(Arc::new(LogEmitter))
        .build()
        .context("building sync engine")?;

    let restored = engine.restore().await.context("restoring engine state")?;
    info!(
        profiles = restored.profiles,
        requeued = restored.requeued,
        "Sync engine ready"
    );

    let scheduler = Scheduler::spawn(engine.clone(), config.poll_interval());

    shutdown_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler did not stop cleanly");
    }
    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "Webhook dispatcher did not stop cleanly");
    }
    db.close().await;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,francis=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
