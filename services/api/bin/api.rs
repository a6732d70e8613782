//! Main Entrypoint for the Acme Voice Backend
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Building shared state (LLM client, document index, relay connector).
//! 4. Constructing the API and relay routers and applying middleware.
//! 5. Starting both listeners and handling graceful shutdown.

use acmevoice_api::{
    config::Config,
    router::create_api_router,
    state::AppState,
    ws::{relay_router, upstream::OpenAiConnector},
};
use acmevoice_core::{
    index::{DocumentIndex, HttpDocumentIndex},
    llm_client::OpenAICompatibleClient,
};
use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::sync::{Arc, atomic::AtomicUsize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared State ---
    let openai_config = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let index = config
        .index_url
        .clone()
        .map(|url| Arc::new(HttpDocumentIndex::new(url)) as Arc<dyn DocumentIndex>);
    if index.is_none() {
        info!("No INDEX_URL configured; /api/context will answer without retrieval.");
    }

    let connector = Arc::new(OpenAiConnector::new(config.openai_api_key.clone()));

    let app_state = Arc::new(AppState {
        llm_client,
        index,
        connector,
        active_sessions: AtomicUsize::new(0),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Routers and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = create_api_router(app_state.clone()).layer(cors);
    let relay = relay_router(app_state);

    // --- 5. Start Servers ---
    info!(
        api = %config.api_bind_address,
        relay = %config.relay_bind_address,
        realtime_model = %config.realtime_model,
        "Service configured. Starting listeners..."
    );
    let api_listener = tokio::net::TcpListener::bind(config.api_bind_address).await?;
    let relay_listener = tokio::net::TcpListener::bind(config.relay_bind_address).await?;

    tokio::try_join!(
        axum::serve(api_listener, api).with_graceful_shutdown(shutdown_signal()),
        axum::serve(relay_listener, relay).with_graceful_shutdown(shutdown_signal()),
    )?;

    info!("Server has shut down.");
    Ok(())
}
