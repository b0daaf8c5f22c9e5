//! # FieldSync Agent
//!
//! Headless host for the offline sync layer.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. init tracing (RUST_LOG, default info,fieldsync=debug,sqlx=warn)    │
//! │  2. load fieldsync.toml (argv[1] or platform default), writing one     │
//! │     with a fresh device id on first run                                │
//! │  3. open SQLite + file store under [storage]                           │
//! │  4. build FieldSync over HttpRemoteStore, init (rehydrate, reconcile)  │
//! │  5. log every queue/cache snapshot until Ctrl-C or SIGTERM             │
//! │  6. stop the workers, close the database                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use fieldsync_core::{CacheWarningLevel, QueueCounts};
use fieldsync_db::{Database, DbConfig, LocalFileStore};
use fieldsync_sync::{FieldSync, FieldSyncBuilder, HttpRemoteStore, RemoteStore, SyncConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load_or_init(config_path)?;
    info!(
        device_id = %config.device_id(),
        remote = %config.remote_url(),
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.storage.database_path())).await?;
    let files = LocalFileStore::new(config.storage.files_dir());
    let remote = RemoteStore::from_single(Arc::new(HttpRemoteStore::from_config(&config)?));

    let sync = FieldSyncBuilder::new(config)
        .with_database(db.clone())
        .with_files(files)
        .with_remote(remote)
        .build()?;

    let report = sync.init().await?;
    info!(
        uploads = report.uploads.loaded,
        records = report.data.loaded,
        documents = report.documents.documents,
        "Agent running"
    );

    if let Err(e) = watch(&sync).await {
        error!(error = %e, "Status watch stopped");
    }

    sync.shutdown().await;
    db.close().await;
    info!("Agent stopped");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=fieldsync_sync=trace` - Trace the sync crate only
/// - Default: INFO, DEBUG for fieldsync crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fieldsync=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Logs snapshot changes until a shutdown signal arrives.
async fn watch(sync: &FieldSync) -> fieldsync_sync::SyncResult<()> {
    let mut uploads = sync.uploads().subscribe().await?;
    let mut data = sync.data().subscribe().await?;
    let mut documents = sync.documents().subscribe().await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(snapshot) = uploads.recv() => log_counts("upload", QueueCounts::tally(&snapshot)),
            Some(snapshot) = data.recv() => log_counts("data", QueueCounts::tally(&snapshot)),
            Some(_) = documents.recv() => {
                let usage = sync.documents().cache_usage().await?;
                match usage.warning {
                    CacheWarningLevel::None => info!(
                        documents = usage.document_count,
                        total_bytes = usage.total_bytes,
                        "Document cache"
                    ),
                    level => warn!(
                        documents = usage.document_count,
                        total_bytes = usage.total_bytes,
                        warning = ?level,
                        "Document cache is large"
                    ),
                }
            }
            else => break,
        }
    }

    Ok(())
}

fn log_counts(queue: &str, counts: QueueCounts) {
    info!(
        queue,
        pending = counts.pending,
        in_progress = counts.in_progress,
        failed = counts.failed,
        "Queue status"
    );
}

/// Resolves on Ctrl+C or SIGTERM.
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

    info!("Shutdown signal received");
}
