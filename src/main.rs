//! Test data management service binary.
//!
//! Resolves configuration once, builds the session source for the selected backend and serves
//! the REST API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use tdm_core::{CoreConfig, DbBackend, MemoryDatabase, OraclePools, SessionSource};

/// Main entry point for the TDM service
///
/// # Environment Variables
/// - `TDM_BIND_ADDR`: bind host (default: "0.0.0.0")
/// - `PORT`: HTTP port (default: 3000)
/// - `TDM_DB_BACKEND`: `oracle` (default) or `memory`
/// - `DB_USER`, `DB_PASSWORD`, `TDM_DB_CONNECT_<ENV>`: Oracle credentials and descriptors
/// - `API_USER_ID`, `API_PASSWORD`, `EXTERNAL_API_DOMAIN_CORE`: external API proxy
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tdm=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(CoreConfig::from_lookup(|key| std::env::var(key).ok())?);

    let host = std::env::var("TDM_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = match std::env::var("PORT") {
        Ok(port) => port.trim().parse()?,
        Err(_) => 3000,
    };
    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    let sessions: Arc<dyn SessionSource> = match cfg.database().backend {
        DbBackend::Oracle => {
            let configured: Vec<String> = cfg
                .database()
                .connect_descriptors
                .keys()
                .map(ToString::to_string)
                .collect();
            tracing::info!("++ Oracle backend, environments: {:?}", configured);
            Arc::new(OraclePools::new(cfg.database().clone()))
        }
        DbBackend::Memory => {
            tracing::warn!("++ In-memory backend; data is lost on exit");
            Arc::new(MemoryDatabase::new())
        }
    };

    let app = router(AppState::new(cfg.clone(), sessions.clone())?);

    tracing::info!("-- Starting TDM REST API on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("-- Closing database sessions");
    tokio::task::spawn_blocking(move || sessions.shutdown()).await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
