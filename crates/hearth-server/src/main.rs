//! hearth HTTP Server
//!
//! Axum front door for the assistant: chat over SSE, confirmation of
//! suspended tool calls, health. Tool execution itself lives in a separate
//! gateway service; reasoning engines are reached through the provider
//! adapters.

mod gateway;
mod handlers;
mod state;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth_core::{
    CoreConfig, EngineSummarizer, ProviderAdapter, SessionContextManager, ToolCatalog,
};
use hearth_providers::{
    AnthropicClient, PlainProvider, StructuredConfig, StructuredProvider, TaggedConfig,
    TaggedProvider,
};

use crate::gateway::HttpToolGateway;
use crate::handlers::{chat_handler, confirm_handler, health_check};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let core_config = CoreConfig::from_env();
    let catalog = Arc::new(ToolCatalog::standard());
    let gateway = Arc::new(HttpToolGateway::from_env());

    // Provider shapes, capable ones first in routing preference order
    let structured_config = StructuredConfig::from_env();
    let summarizer_client = Arc::new(AnthropicClient::new(structured_config.clone()));

    let providers: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(StructuredProvider::new(
            structured_config,
            gateway.clone(),
            catalog.clone(),
            core_config.agent.clone(),
        )),
        Arc::new(TaggedProvider::new(
            TaggedConfig::from_env(),
            gateway.clone(),
            catalog.clone(),
            core_config.agent.clone(),
        )),
        Arc::new(PlainProvider::from_env()),
    ];

    for provider in &providers {
        if provider.reachable() {
            tracing::info!("✓ {} provider configured", provider.kind());
        } else {
            tracing::warn!("⚠ {} provider not configured", provider.kind());
        }
    }

    let context = Arc::new(SessionContextManager::new(
        core_config.context.clone(),
        Arc::new(EngineSummarizer::new(summarizer_client)),
    ));

    let state = AppState {
        providers: Arc::new(providers),
        context,
        pending: Arc::new(RwLock::new(HashMap::new())),
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/chat", post(chat_handler))
        .route("/api/confirm", post(confirm_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("hearth server running on http://{}", addr);
    tracing::info!("  GET  /health       - Health and provider availability");
    tracing::info!("  POST /api/chat     - Send a message (SSE response)");
    tracing::info!("  POST /api/confirm  - Resolve a pending confirmation (SSE response)");

    axum::serve(listener, app).await?;

    Ok(())
}
