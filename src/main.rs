use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use session_coordinator::coordinator::start_refresh_task;
use session_coordinator::notifier::Notice;
use session_coordinator::{config::Config, Coordinator, HttpVerifier, SessionCache};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "session-coordinator starting");

    let config = Config::load()?;
    info!(context = %config.context_id, "Loaded configuration");

    let cache = SessionCache::open(&config.cache.data_dir)?;
    info!("Session cache opened at: {}", config.cache.data_dir);

    let verifier = HttpVerifier::new(&config.verifier)?;
    info!(url = %verifier.url(), "Verifying sessions against remote endpoint");

    let coordinator = Coordinator::new(
        cache,
        Arc::new(verifier),
        config.policy.clone(),
        config.context_id.clone(),
    );

    // Hydrate from the cache before touching the network
    let hydrated = coordinator.current()?;
    info!(
        status = ?hydrated.status,
        has_credential = hydrated.has_credential(),
        "Hydrated session from cache"
    );

    match coordinator.verify(false).await {
        Ok(session) => info!(status = ?session.status, "Initial verification complete"),
        Err(e) => warn!(error = %e, "Initial verification failed (will retry on refresh)"),
    }

    let changes = coordinator.subscribe(|notice| match notice {
        Notice::Change(change) => info!(
            origin = %change.origin,
            revision = change.revision,
            reason = ?change.reason,
            "Session changed"
        ),
        Notice::Lagged { skipped } => warn!(skipped, "Missed session change notifications"),
    });

    let refresh_handle = start_refresh_task(coordinator.clone());
    if refresh_handle.is_none() {
        info!("Periodic refresh disabled");
    }

    shutdown_signal().await;

    // Cleanup: abort background tasks
    info!("Shutting down background tasks");
    if let Some(handle) = refresh_handle {
        handle.abort();
    }
    changes.unsubscribe();

    if let Some(lock) = coordinator.cache().verification_lock()? {
        if lock.context_id == coordinator.context_id() {
            coordinator.cache().release_lock(&lock.attempt_id)?;
        }
    }

    info!("Shutdown complete");
    Ok(())
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

    info!("Shutdown signal received");
}
