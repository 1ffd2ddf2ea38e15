//! # Memory Tiers
//!
//! The four storage tiers of the cascade. Each tier is polymorphic over the
//! capability set it needs and wraps adapter failures in tier-operation
//! errors that preserve the cause.

mod active_context;
mod episodic;
mod semantic;
mod working_memory;

pub use active_context::{ActiveContextConfig, ActiveContextTier};
pub use episodic::{
    EpisodeMatch, EpisodicConfig, EpisodicMemoryTier, ReconciliationReport,
};
pub use semantic::{KnowledgeHit, SemanticConfig, SemanticMemoryTier};
pub use working_memory::{WorkingMemoryConfig, WorkingMemoryTier};

use serde::{Deserialize, Serialize};

use crate::error::TierKind;
use crate::storage::AdapterHealth;

/// Rolled-up health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health report for one tier, aggregated over its adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: TierKind,
    pub status: HealthStatus,
    pub adapters: Vec<AdapterHealth>,
}

impl TierHealth {
    /// Healthy iff every adapter is healthy; degraded when some are;
    /// unhealthy when none are.
    #[must_use]
    pub fn from_adapters(tier: TierKind, adapters: Vec<AdapterHealth>) -> Self {
        let healthy = adapters.iter().filter(|a| a.healthy).count();
        let status = if healthy == adapters.len() {
            HealthStatus::Healthy
        } else if healthy > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            tier,
            status,
            adapters,
        }
    }
}
