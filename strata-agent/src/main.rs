//! Agent HTTP entry point.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_agent::bootstrap::build_memory_system;
use strata_agent::{build_router, AppState};
use strata_core::config::SystemConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = SystemConfig::from_env();
    let memory = build_memory_system(config)
        .await
        .context("failed to build memory system")?;

    let agent_prefix =
        std::env::var("AGENT_PREFIX").unwrap_or_else(|_| "ltm_agent".to_string());
    let state = AppState::new(memory, agent_prefix);
    let router = build_router(state);

    let addr = std::env::var("AGENT_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Agent listening on {addr}");

    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}
