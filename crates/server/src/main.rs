//! Voice ordering gateway entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use voice_order_config::Settings;
use voice_order_persistence::{InMemoryStore, StoreConfig};
use voice_order_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Warning: failed to load settings: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing();
    tracing::info!("Starting voice ordering gateway v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "configuration invalid");
        std::process::exit(1);
    }

    let settings = Arc::new(settings);

    let state = if settings.persistence.enabled {
        let store_config = StoreConfig {
            hosts: settings.persistence.hosts.clone(),
            keyspace: settings.persistence.keyspace.clone(),
            replication_factor: settings.persistence.replication_factor,
        };
        match voice_order_persistence::init(store_config).await {
            Ok(layer) => {
                tracing::info!(
                    hosts = ?settings.persistence.hosts,
                    keyspace = %settings.persistence.keyspace,
                    "store initialized"
                );
                AppState::new(
                    settings.clone(),
                    Arc::new(layer.calls),
                    Arc::new(layer.orders),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, "store init failed, falling back to in-memory");
                let store = Arc::new(InMemoryStore::new());
                AppState::new(settings.clone(), store.clone(), store)
            }
        }
    } else {
        tracing::info!("persistence disabled, using in-memory store");
        let store = Arc::new(InMemoryStore::new());
        AppState::new(settings.clone(), store.clone(), store)
    };

    let registry = state.registry.clone();
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining sessions");
    registry.shutdown_all().await;

    let drained = async {
        while registry.count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    let grace = Duration::from_secs(settings.server.shutdown_grace_secs);
    if tokio::time::timeout(grace, drained).await.is_err() {
        tracing::error!(
            sessions = registry.count(),
            "sessions still live after {}s grace, forcing exit",
            grace.as_secs()
        );
        std::process::exit(1);
    }

    server.abort();
    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_order=info,tower_http=info".into()),
        )
        .init();
}
