//! MOC server: the incident-response control plane binary.
//!
//! Runs against PostgreSQL when a database URL is given, otherwise against the
//! in-memory store. The outbox relay runs as a background task.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use moc_server::config::MocConfig;
use moc_server::services::bus::{self, EventPublisher};
use moc_server::services::outbox::OutboxRelay;
use moc_server::store::{MemoryStore, PgStore, Store};
use moc_server::{build_app, metrics, migration, AppState};

#[derive(Parser)]
#[command(name = "moc", about = "MagicOnCall incident-response control plane")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "MOC_PORT", default_value = "8080")]
    port: u16,

    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum pooled database connections
    #[arg(long, env = "MOC_DB_MAX_CONNECTIONS", default_value = "10")]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    tracing::info!("Starting MOC control plane...");

    let config = MocConfig::from_env();

    let store: Arc<dyn Store> = match cli.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            let pg = PgStore::connect(url, cli.max_connections)?;
            {
                let mut conn = pg
                    .pool()
                    .get()
                    .await
                    .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
                tracing::info!("Running MOC migration...");
                migration::run_migration(&mut conn).await?;
                tracing::info!("MOC migration completed.");
            }
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set -- using the in-memory store");
            MemoryStore::shared()
        }
    };
    tracing::info!(store = store.kind(), "Store ready");

    // Outbox relay
    let publisher: Arc<dyn EventPublisher> = Arc::from(bus::from_url(config.outbox.bus_url.as_deref()));
    let relay = OutboxRelay::new(store.clone(), publisher, config.outbox.batch_size);
    tokio::spawn(relay.run(config.outbox.poll_interval));

    // Initialize metrics
    let metrics_handle = metrics::init_metrics();

    let state = AppState::new(config, store, metrics_handle);
    let app = build_app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("MOC listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
