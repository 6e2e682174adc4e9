//! Tollgate Gateway - authenticating HTTP/WebSocket reverse proxy
//!
//! This is the main entry point for the gateway service.
//!
//! The listener comes up before the signing key is fetched; protected routes
//! answer 503 until the key store has a key. On Unix, `SIGHUP` asks the key
//! store to re-fetch the key immediately.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate_auth::{KeyStore, KeyStoreVerifier};
use tollgate_gateway::{create_router, GatewayConfig, GatewayState};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tollgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting Tollgate Gateway");

    let config = GatewayConfig::from_env()?;
    let auth_config = config.auth_config()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        backends = ?config.backends,
        routes = config.routes.len(),
        key_url = %auth_config.public_key_url(),
        algorithm = ?auth_config.algorithm,
        "Gateway configuration loaded"
    );

    let keys = Arc::new(KeyStore::new(auth_config)?);
    let verifier = Arc::new(KeyStoreVerifier::new(Arc::clone(&keys)));

    let listen_addr = config.listen_addr.clone();
    let state = GatewayState::from_config(verifier, config)?;
    let rate_limiter = Arc::clone(&state.rate_limiter);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(listen_addr = %listen_addr, "API Gateway listening");

    // Background work starts after bind so requests are served during key fetch.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh = keys.spawn_refresh(shutdown_rx.clone());
    let sweeper = tokio::spawn(rate_limiter.run_sweeper(shutdown_rx.clone()));
    let reload = tokio::spawn(reload_on_hangup(Arc::clone(&keys), shutdown_rx));

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    tracing::info!("Shutting down background tasks");
    let _ = shutdown_tx.send(true);
    for task in [refresh, sweeper, reload] {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    served?;
    tracing::info!("Process terminated");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("SIGTERM signal received: closing HTTP server"),
    }
}

/// Re-fetch the signing key on every `SIGHUP` until shutdown.
#[cfg(unix)]
async fn reload_on_hangup(keys: Arc<KeyStore>, mut shutdown: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                tracing::info!("SIGHUP received: re-fetching public key");
                keys.request_refresh();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_keys: Arc<KeyStore>, mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
