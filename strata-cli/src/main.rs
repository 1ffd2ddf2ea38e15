//! Operator CLI: run engine cycles, inspect context, export metrics, and
//! check health against a configured backend set.

use std::collections::BTreeMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata_agent::bootstrap::build_memory_system;
use strata_agent::{build_router, AppState};
use strata_core::config::SystemConfig;
use strata_core::engines::DistillationRequest;
use strata_core::metrics::ExportFormat;
use strata_core::system::ContextRequest;

#[derive(Parser)]
#[command(name = "strata", about = "Hierarchical cognitive memory system", version)]
struct Cli {
    /// Path to a TOML configuration file (environment overrides still apply)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent HTTP surface
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
        #[arg(long, default_value = "ltm_agent")]
        agent_prefix: String,
    },
    /// Run one promotion cycle (L1 -> L2) for a session
    Promote {
        #[arg(long)]
        session: String,
    },
    /// Run one consolidation cycle (L2 -> L3) for a session
    Consolidate {
        #[arg(long)]
        session: String,
    },
    /// Run one distillation cycle (L3 -> L4)
    Distill {
        #[arg(long)]
        session: Option<String>,
        /// Bypass the episode-count gate
        #[arg(long)]
        force: bool,
    },
    /// Print the assembled context block for a session
    Context {
        #[arg(long)]
        session: String,
        /// Include CIAR scores and timestamps
        #[arg(long)]
        metadata: bool,
    },
    /// Synthesize an answer from L4 knowledge
    Synthesize {
        query: String,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Surface dual-index drift in L3
    Reconcile,
    /// Cascade-delete a session across all tiers
    Cleanup {
        #[arg(long)]
        session: String,
    },
    /// Aggregate health of tiers and LLM providers
    Health,
    /// Export adapter metrics
    Metrics {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<SystemConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SystemConfig::default(),
    };
    // Environment tunables win over file values
    let env = SystemConfig::from_env();
    if path.is_none() {
        config = env;
    } else {
        config.backends = env.backends;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let memory = build_memory_system(config).await?;

    match cli.command {
        Command::Serve { addr, agent_prefix } => {
            let state = AppState::new(memory, agent_prefix);
            let router = build_router(state);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            println!("Agent listening on {addr}");
            axum_serve(listener, router).await?;
        }
        Command::Promote { session } => {
            let stats = memory.run_promotion_cycle(&session).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Consolidate { session } => {
            let stats = memory.run_consolidation_cycle(&session).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Distill { session, force } => {
            let stats = memory
                .run_distillation_cycle(&DistillationRequest {
                    session_id: session,
                    time_range: None,
                    force,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Context { session, metadata } => {
            let block = memory
                .get_context_block(&session, &ContextRequest::default())
                .await?;
            println!("{}", block.to_prompt_string(metadata));
        }
        Command::Synthesize { query, max_results } => {
            let result = memory
                .synthesize_knowledge(&query, &BTreeMap::new(), max_results)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Reconcile => {
            let report = memory.l3().reconcile().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cleanup { session } => {
            memory.cleanup_session(&session).await?;
            println!("Cleaned up session {session}");
        }
        Command::Health => {
            let health = memory.health_check().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Command::Metrics { format } => {
            let format: ExportFormat = format.parse().map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", memory.metrics().export(format));
        }
    }

    Ok(())
}

async fn axum_serve(listener: tokio::net::TcpListener, router: axum::Router) -> anyhow::Result<()> {
    axum::serve(listener, router)
        .await
        .context("server terminated")
}
