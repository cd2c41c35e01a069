//! Beacon — token-gated Q&A board backend.
//!
//! Projects register a token, holders submit questions, and everyone upvotes
//! once per wallet. Access is decided by configurable policies over on-chain
//! (JSON-RPC) and social (Neynar) checks. Exposes a small Axum REST API for
//! the mini-app client.

mod api;
mod config;
mod db;
mod errors;
mod gateway;
mod memory;
mod models;
mod policy;
mod service;
mod store;

use std::sync::Arc;

use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Config, StoreBackend};
use gateway::HttpGateway;
use service::BeaconService;
use store::QaStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // ─── Store ────────────────────────────────────────────
    let store: Arc<dyn QaStore> = match config.store_backend {
        StoreBackend::Sqlite => {
            let pool = db::init_pool(&config.database_url).await?;
            Arc::new(db::SqliteStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; data is lost on restart");
            Arc::new(memory::MemoryStore::new())
        }
    };

    // ─── Identity gateway ─────────────────────────────────
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
        .build()?;
    let gateway = Arc::new(HttpGateway::new(client, &config));

    info!(
        "Policies: project={} question={} upvote={}",
        config.policies.create_project, config.policies.submit_question, config.policies.upvote
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        service: BeaconService::new(store, config.max_question_chars),
        gateway,
        policies: config.policies.clone(),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
}
