use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadenza_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore, Dispatcher,
    FanoutNotifier, LogNotifier, PipelineStages, RequestStore, SqliteAuditStore,
    SqlitePendingSelectionStore, SqliteRequestStore, SubmissionService, SubprocessFetcher,
    SubprocessPublisher, ZipPackager,
};

use cadenza_server::api::{create_router, WsBroadcaster};
use cadenza_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("CADENZA_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("CADENZA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!(
        "Dispatcher: max_concurrent={}, workspace={}",
        config.dispatcher.max_concurrent,
        config.dispatcher.workspace_mode.as_str()
    );

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Stores share one SQLite file
    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let request_store: Arc<dyn RequestStore> = Arc::new(
        SqliteRequestStore::new(&config.database.path)
            .context("Failed to create request store")?,
    );
    info!("Request store initialized");

    let pending_store = Arc::new(
        SqlitePendingSelectionStore::new(&config.database.path)
            .context("Failed to create pending selection store")?,
    );

    // Create audit system
    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    // Pipeline stages
    let fetcher = Arc::new(SubprocessFetcher::new(config.fetcher.clone()));
    let packager = Arc::new(ZipPackager::new(&config.packager));
    let publisher = Arc::new(
        SubprocessPublisher::new(config.publisher.clone())
            .context("Failed to create publisher")?,
    );

    let ws_broadcaster = WsBroadcaster::default();
    let notifier = FanoutNotifier::new()
        .with(Arc::new(LogNotifier))
        .with(Arc::new(ws_broadcaster.clone()));

    let stages = PipelineStages {
        fetcher: fetcher.clone(),
        packager,
        publisher,
        notifier: Arc::new(notifier),
    };

    let dispatcher = Arc::new(
        Dispatcher::new(
            config.dispatcher.clone(),
            config.packager.scratch_dir.clone(),
            Arc::clone(&request_store),
            stages,
            Some(audit_handle.clone()),
        )
        .context("Failed to create dispatcher")?,
    );
    dispatcher.start().await;

    let submission = Arc::new(SubmissionService::new(
        &config.submission,
        Arc::clone(&request_store),
        pending_store,
        fetcher,
        dispatcher.signal(),
        Some(audit_handle.clone()),
    ));

    // Sweep expired selections in the background
    let (purge_shutdown_tx, purge_shutdown_rx) = broadcast::channel(1);
    let purge_handle = tokio::spawn(purge_expired_selections(
        Arc::clone(&submission),
        Duration::from_secs(config.server.selection_purge_interval_secs),
        purge_shutdown_rx,
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_store,
        request_store,
        Arc::clone(&submission),
        Arc::clone(&dispatcher),
        ws_broadcaster,
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    let _ = purge_shutdown_tx.send(());
    let _ = purge_handle.await;

    if dispatcher.is_running() {
        dispatcher.stop().await;
    }

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle is gone. Detached pipelines
    // may still hold one through the dispatcher; they are abandoned here and
    // recovered as interrupted on the next start.
    drop(submission);
    drop(dispatcher);
    drop(audit_handle);

    match tokio::time::timeout(Duration::from_secs(5), writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer still busy, exiting anyway"),
    }

    Ok(())
}

async fn purge_expired_selections(
    submission: Arc<SubmissionService>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match submission.purge_expired_selections().await {
                    Ok(0) => {}
                    Ok(n) => debug!("Purged {} expired selections", n),
                    Err(e) => error!("Failed to purge expired selections: {}", e),
                }
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
