use anyhow::Context;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracker_backend::{config::Config, create_app, helpers::now};
use tracker_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting server tracker backend...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, base_path={:?}, body_limit={}KB, timeout={}s, api_key={}",
        config.port,
        config.database_path,
        config.base_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        if config.ingest_api_key.is_some() { "set" } else { "unset" }
    );
    tracing::info!(
        "Rate limits: ingest={}/sec (burst {}), admin={}/min (burst {}), general={}/sec (burst {})",
        config.rate_limit_ingest_per_sec,
        config.rate_limit_ingest_burst,
        config.rate_limit_admin_per_min,
        config.rate_limit_admin_burst,
        config.rate_limit_general_per_sec,
        config.rate_limit_general_burst
    );

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;

    if config.close_open_sessions_on_start {
        let closed = db
            .close_open_sessions(now())
            .await
            .context("failed to close sessions left open by the previous run")?;
        if closed > 0 {
            tracing::info!(closed, "Closed sessions left open by the previous run");
        }
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let app = create_app(db, config);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
