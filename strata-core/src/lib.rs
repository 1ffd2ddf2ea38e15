#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::float_cmp)]

//! # Strata Core
//!
//! A hierarchical cognitive memory system for conversational agents: a
//! four-tier cascade (L1 → L2 → L3 → L4) where each tier holds
//! progressively more abstract, longer-lived, smaller-volume artifacts,
//! with lifecycle engines promoting data between tiers.
//!
//! ## Core Concepts
//!
//! - **Turns** (L1): recent conversational messages in a windowed, TTL'd
//!   buffer backed by a KV hot path and a relational cold path
//! - **Facts** (L2): distilled statements gated by the CIAR significance
//!   score (`certainty × impact × age_decay × recency_boost`)
//! - **Episodes** (L3): time-clustered fact summaries, bi-temporal,
//!   dual-indexed in a vector store and a graph store
//! - **Knowledge documents** (L4): generalized insights with full-text
//!   search, faceted filtering, and provenance back to episodes
//!
//! ## Module Organization
//!
//! - [`models`]: the data model shared by every tier
//! - [`storage`]: capability traits per backend kind + in-memory adapters
//! - [`tiers`]: the four tier implementations
//! - [`engines`]: Promotion, Consolidation, Distillation, and the
//!   query-time KnowledgeSynthesizer
//! - [`ciar`]: the significance scorer
//! - [`llm`]: multi-provider LLM client with ordered fallback
//! - [`system`]: the [`system::UnifiedMemorySystem`] facade
//! - [`metrics`], [`retry`], [`lock`], [`lifecycle`]: cross-cutting infra
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::config::SystemConfig;
//! use strata_core::llm::LlmClient;
//! use strata_core::models::{Role, Turn};
//! use strata_core::system::{ContextRequest, UnifiedMemorySystem};
//!
//! #[tokio::main]
//! async fn main() -> strata_core::Result<()> {
//!     let llm = Arc::new(LlmClient::from_env());
//!     let memory = UnifiedMemorySystem::in_memory(llm, SystemConfig::default());
//!     memory.initialize().await?;
//!
//!     memory
//!         .store_turn(&Turn::new("session-1", "turn-1", Role::User, "I prefer rail freight"))
//!         .await?;
//!
//!     let stats = memory.run_promotion_cycle("session-1").await;
//!     println!("promoted {} facts", stats.facts_promoted);
//!
//!     let block = memory
//!         .get_context_block("session-1", &ContextRequest::default())
//!         .await?;
//!     println!("{}", block.to_prompt_string(false));
//!     Ok(())
//! }
//! ```

pub mod ciar;
pub mod config;
pub mod engines;
pub mod error;
pub mod lifecycle;
pub mod llm;
pub mod lock;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod storage;
pub mod system;
pub mod tiers;

// Re-export commonly used types
pub use ciar::{CiarComponents, CiarConfig, CiarScorer};
pub use config::{BackendConfig, SystemConfig, SystemFlags};
pub use error::{Error, Result, TierKind};
pub use lifecycle::{BroadcastLifecycleStream, LifecycleEvent, LifecycleSink};
pub use lock::{LeaseConfig, LeaseGuard, SessionLease};
pub use metrics::{ExportFormat, MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use models::{
    ContextBlock, EntityRef, Episode, EpisodeQuery, Fact, FactCategory, FactQuery, FactType,
    KnowledgeDocument, KnowledgeQuery, KnowledgeType, Role, Turn, TurnQuery,
};
pub use retry::{RetryConfig, RetryMetrics, RetryPolicy};
pub use system::{ContextRequest, MemoryAdapters, MemoryState, SystemHealth, UnifiedMemorySystem};
