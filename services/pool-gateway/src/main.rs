//! Pool Gateway
//!
//! Single-binary service that:
//! 1. Loads a set of HTTP sessions (header sets) from a JSON file
//! 2. Keeps them in a health-tracked resource pool
//! 3. Fans batches of outbound requests across the active sessions
//! 4. Exposes session management, health and metrics over an admin API

mod admin;
mod config;
mod error;
mod http_operation;
mod metrics;
mod session;
mod session_store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use session_pool::{Dispatcher, ResourcePool, spawn_health_reporter};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::Config;
use crate::http_operation::HttpRequestOperation;
use crate::session_store::SessionStore;

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL takes precedence over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting pool-gateway");

    // Install before the pool emits anything
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let config_path = Config::resolve_path(cli_config_path(&args));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.admin.listen_addr,
        sessions_file = %config.pool.sessions_file.display(),
        failure_threshold = config.pool.failure_threshold,
        parallelism = config.dispatch.parallelism,
        policy = config.dispatch.policy().label(),
        headers = config.headers.len(),
        admin_auth = config.admin.token.is_some(),
        "configuration loaded"
    );

    let store = SessionStore::load(config.pool.sessions_file.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load sessions from {}",
                config.pool.sessions_file.display()
            )
        })?;
    let store = Arc::new(store);

    let pool = Arc::new(
        ResourcePool::new(config.pool.failure_threshold).context("invalid pool configuration")?,
    );
    for (id, record) in store.entries().await {
        // A bad record stays in the file for an operator to fix
        if let Err(e) = session::register(&pool, &id, &record).await {
            error!(session_id = %id, error = %e, "skipping invalid session");
        }
    }
    let (total, active, _) = pool.counts().await;
    if store.is_empty().await {
        warn!("session file is empty, add sessions via POST /admin/resources");
    } else if active == 0 {
        warn!(total, "no active sessions, dispatch unavailable until sessions are added");
    } else {
        info!(total, active, "pool ready");
    }

    let reporter = spawn_health_reporter(
        pool.clone(),
        Duration::from_secs(config.pool.report_interval_secs),
    );

    let mut dispatcher = Dispatcher::new(pool.clone(), config.dispatch.parallelism)
        .context("invalid dispatch configuration")?
        .with_policy(config.dispatch.policy());
    if let Some(timeout) = config.dispatch.job_timeout() {
        dispatcher = dispatcher.with_job_timeout(timeout);
    }

    let operation = HttpRequestOperation::new(
        reqwest::Client::new(),
        &config.headers,
        Duration::from_secs(config.http.timeout_secs),
    );

    let state = AdminState::new(
        Arc::new(dispatcher),
        Arc::new(operation),
        store,
        prometheus_handle,
        config.admin.token.clone(),
    );
    let app = admin::build_router(state, config.admin.max_connections);

    let listen_addr = config.admin.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    reporter.abort();
    info!("shutdown complete");
    Ok(())
}

/// Value following `--config`, if present.
fn cli_config_path(args: &[String]) -> Option<&str> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
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
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
