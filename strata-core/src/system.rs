//! # Unified Memory System
//!
//! The facade composing all tiers, engines, the CIAR scorer, and the LLM
//! client. Agents talk to this type only: context assembly, engine cycle
//! triggers, knowledge synthesis, cascade cleanup, and aggregate health.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::ciar::CiarScorer;
use crate::config::SystemConfig;
use crate::engines::{
    ConsolidationConfig, ConsolidationEngine, ConsolidationStats, DistillationConfig,
    DistillationEngine, DistillationRequest, DistillationStats, ExtractorConfig, FactExtractor,
    KnowledgeSynthesizer, PromotionConfig, PromotionEngine, PromotionStats, SegmenterConfig,
    SynthesisResult, SynthesizerConfig, TopicSegmenter,
};
use crate::error::Result;
use crate::lifecycle::{BroadcastLifecycleStream, LifecycleEvent, LifecycleSink};
use crate::llm::{LlmClient, ProviderHealth};
use crate::metrics::MetricsCollector;
use crate::models::{ContextBlock, Turn};
use crate::storage::memory::{
    InMemoryFullTextStore, InMemoryGraphStore, InMemoryKvStore, InMemoryRelationalStore,
    InMemoryVectorStore,
};
use crate::storage::{FullTextStore, GraphStore, KvListStore, RelationalStore, VectorStore};
use crate::tiers::{
    ActiveContextTier, EpisodicMemoryTier, HealthStatus, SemanticMemoryTier, TierHealth,
    WorkingMemoryTier,
};

/// The capability bundle the facade is built over.
pub struct MemoryAdapters {
    pub kv: Arc<dyn KvListStore>,
    pub relational: Arc<dyn RelationalStore>,
    pub vector: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub fulltext: Arc<dyn FullTextStore>,
}

impl MemoryAdapters {
    /// Fully in-memory adapter set (tests, demos, zero-dependency runs).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(InMemoryKvStore::new()),
            relational: Arc::new(InMemoryRelationalStore::new()),
            vector: Arc::new(InMemoryVectorStore::new()),
            graph: Arc::new(InMemoryGraphStore::new()),
            fulltext: Arc::new(InMemoryFullTextStore::new()),
        }
    }
}

/// Parameters for context assembly.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub min_ciar: Option<f64>,
    pub max_turns: usize,
    pub max_facts: usize,
    pub include_episodes: bool,
    pub include_knowledge: bool,
}

impl Default for ContextRequest {
    fn default() -> Self {
        Self {
            min_ciar: None,
            max_turns: 20,
            max_facts: 10,
            include_episodes: false,
            include_knowledge: false,
        }
    }
}

/// Per-tier item counts for one session.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryState {
    pub session_id: String,
    pub l1_turns: usize,
    pub l2_facts: u64,
    pub l3_episodes: u64,
    pub l4_docs: u64,
}

/// Aggregate system health.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub tiers: Vec<TierHealth>,
    pub llm_providers: Vec<ProviderHealth>,
}

/// Facade over the four tiers and three lifecycle engines.
pub struct UnifiedMemorySystem {
    config: SystemConfig,
    metrics: Arc<MetricsCollector>,
    lifecycle: Arc<BroadcastLifecycleStream>,

    l1: Arc<ActiveContextTier>,
    l2: Arc<WorkingMemoryTier>,
    l3: Arc<EpisodicMemoryTier>,
    l4: Arc<SemanticMemoryTier>,

    promotion: PromotionEngine,
    consolidation: ConsolidationEngine,
    distillation: DistillationEngine,
    synthesizer: KnowledgeSynthesizer,

    llm: Arc<LlmClient>,
}

impl UnifiedMemorySystem {
    /// Compose the system over an adapter bundle.
    #[must_use]
    pub fn new(adapters: MemoryAdapters, llm: Arc<LlmClient>, config: SystemConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let lifecycle = Arc::new(BroadcastLifecycleStream::default());
        let scorer = CiarScorer::new(config.ciar.clone());

        let l1 = Arc::new(ActiveContextTier::new(
            adapters.kv,
            Arc::clone(&adapters.relational),
            Arc::clone(&metrics),
            config.l1.clone(),
        ));
        let l2 = Arc::new(WorkingMemoryTier::new(
            adapters.relational,
            Arc::clone(&metrics),
            config.l2.clone(),
        ));
        let l3 = Arc::new(EpisodicMemoryTier::new(
            adapters.vector,
            adapters.graph,
            Arc::clone(&metrics),
            config.l3.clone(),
        ));
        let l4 = Arc::new(SemanticMemoryTier::new(
            adapters.fulltext,
            Arc::clone(&metrics),
            config.l4.clone(),
        ));

        let segmenter = TopicSegmenter::new(Arc::clone(&llm), SegmenterConfig::default());
        let extractor = FactExtractor::new(
            Arc::clone(&llm),
            scorer.clone(),
            ExtractorConfig::default(),
        );

        let mut promotion = PromotionEngine::new(
            Arc::clone(&l1),
            Arc::clone(&l2),
            segmenter,
            extractor,
            scorer,
            PromotionConfig {
                promotion_threshold: config.ciar.threshold,
                ..PromotionConfig::default()
            },
        );
        let mut consolidation = ConsolidationEngine::new(
            Arc::clone(&l2),
            Arc::clone(&l3),
            Arc::clone(&llm),
            ConsolidationConfig::default(),
        );
        let mut distillation = DistillationEngine::new(
            Arc::clone(&l3),
            Arc::clone(&l4),
            Arc::clone(&llm),
            DistillationConfig::default(),
        );
        if config.flags.enable_telemetry {
            let sink: Arc<dyn LifecycleSink> = Arc::clone(&lifecycle) as Arc<dyn LifecycleSink>;
            promotion = promotion.with_lifecycle(Arc::clone(&sink));
            consolidation = consolidation.with_lifecycle(Arc::clone(&sink));
            distillation = distillation.with_lifecycle(sink);
        }

        let synthesizer = KnowledgeSynthesizer::new(
            Arc::clone(&l4),
            Arc::clone(&llm),
            SynthesizerConfig::default(),
        );

        Self {
            config,
            metrics,
            lifecycle,
            l1,
            l2,
            l3,
            l4,
            promotion,
            consolidation,
            distillation,
            synthesizer,
            llm,
        }
    }

    /// Fully in-memory system (tests, demos).
    #[must_use]
    pub fn in_memory(llm: Arc<LlmClient>, config: SystemConfig) -> Self {
        Self::new(MemoryAdapters::in_memory(), llm, config)
    }

    /// Initialize collections and verify fatal configuration requirements
    /// (the full-text index on `working_memory.content` among them).
    ///
    /// # Errors
    ///
    /// Returns the first initialization failure.
    pub async fn initialize(&self) -> Result<()> {
        self.l3.initialize().await?;
        self.l4.initialize().await?;
        info!("Unified memory system initialized");
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<BroadcastLifecycleStream> {
        &self.lifecycle
    }

    #[must_use]
    pub fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }

    #[must_use]
    pub fn l1(&self) -> &Arc<ActiveContextTier> {
        &self.l1
    }

    #[must_use]
    pub fn l2(&self) -> &Arc<WorkingMemoryTier> {
        &self.l2
    }

    #[must_use]
    pub fn l3(&self) -> &Arc<EpisodicMemoryTier> {
        &self.l3
    }

    #[must_use]
    pub fn l4(&self) -> &Arc<SemanticMemoryTier> {
        &self.l4
    }

    /// Write a turn into L1.
    ///
    /// # Errors
    ///
    /// Propagates the tier error.
    pub async fn store_turn(&self, turn: &Turn) -> Result<String> {
        self.l1.store(turn).await
    }

    /// Assemble a context block: recent L1 turns plus top-CIAR L2 facts,
    /// optionally joined by L3 summaries and L4 snippets.
    ///
    /// # Errors
    ///
    /// Propagates tier errors.
    pub async fn get_context_block(
        &self,
        session_id: &str,
        request: &ContextRequest,
    ) -> Result<ContextBlock> {
        let min_ciar = request.min_ciar.unwrap_or(self.config.min_ciar);
        if self.config.flags.enable_telemetry {
            self.lifecycle.publish(LifecycleEvent::new(
                "context_retrieval_start",
                session_id,
                serde_json::json!({"min_ciar": min_ciar, "max_turns": request.max_turns}),
            ));
        }

        let mut block = ContextBlock::new(session_id, min_ciar);

        let mut turns = self.l1.retrieve_session(session_id).await?;
        turns.truncate(request.max_turns);
        block.recent_turns = turns;

        block.significant_facts = self
            .l2
            .query_by_session(session_id, Some(min_ciar), request.max_facts)
            .await?;

        if request.include_episodes {
            block.episode_summaries = self
                .l3
                .episodes_by_session(session_id, 5)
                .await?
                .into_iter()
                .map(|episode| episode.summary)
                .collect();
        }
        if request.include_knowledge {
            let query = crate::models::KnowledgeQuery::default().with_limit(3);
            block.knowledge_snippets = self
                .l4
                .search(&query, None)
                .await?
                .into_iter()
                .map(|hit| hit.document.content)
                .collect();
        }

        block.estimate_token_count();
        if self.config.flags.enable_telemetry {
            self.lifecycle.publish(LifecycleEvent::new(
                "context_retrieval_end",
                session_id,
                serde_json::json!({
                    "turn_count": block.turn_count(),
                    "fact_count": block.fact_count(),
                    "estimated_tokens": block.estimated_tokens,
                }),
            ));
        }
        Ok(block)
    }

    /// Trigger L1 → L2 promotion, honoring the ablation flag.
    pub async fn run_promotion_cycle(&self, session_id: &str) -> PromotionStats {
        if !self.config.flags.enable_promotion {
            debug!("Promotion cycle skipped (disabled)");
            return PromotionStats::skipped(session_id, "promotion_disabled");
        }
        self.promotion.process_session(session_id).await
    }

    /// Trigger L2 → L3 consolidation, honoring the ablation flag.
    pub async fn run_consolidation_cycle(&self, session_id: &str) -> ConsolidationStats {
        if !self.config.flags.enable_consolidation {
            debug!("Consolidation cycle skipped (disabled)");
            return ConsolidationStats::skipped(session_id, "consolidation_disabled");
        }
        self.consolidation.process_session(session_id).await
    }

    /// Trigger L3 → L4 distillation, honoring the ablation flag.
    pub async fn run_distillation_cycle(
        &self,
        request: &DistillationRequest,
    ) -> DistillationStats {
        if !self.config.flags.enable_distillation {
            debug!("Distillation cycle skipped (disabled)");
            return DistillationStats::skipped("distillation_disabled");
        }
        self.distillation.process(request).await
    }

    /// Query-time knowledge synthesis over L4.
    ///
    /// # Errors
    ///
    /// Propagates retrieval errors; LLM failures degrade to a fallback
    /// answer instead.
    pub async fn synthesize_knowledge(
        &self,
        query: &str,
        metadata_filters: &BTreeMap<String, Value>,
        max_results: Option<usize>,
    ) -> Result<SynthesisResult> {
        self.synthesizer
            .synthesize(query, metadata_filters, max_results)
            .await
    }

    /// Cascade-delete a session across all tiers, L4 → L3 → L2 → L1, to
    /// preserve referential closure.
    ///
    /// # Errors
    ///
    /// Returns the first tier error encountered.
    pub async fn cleanup_session(&self, session_id: &str) -> Result<()> {
        self.l4.delete_by_session(session_id).await?;
        self.l3.delete_session(session_id).await?;
        self.l2.delete_session(session_id).await?;
        self.l1.delete_session(session_id).await?;
        info!("Cleaned up session {session_id} across all tiers");
        Ok(())
    }

    /// Per-tier item counts for a session.
    ///
    /// # Errors
    ///
    /// Propagates tier errors.
    pub async fn memory_state(&self, session_id: &str) -> Result<MemoryState> {
        let l1_turns = self.l1.retrieve_session(session_id).await?.len();
        let l2_facts = self.l2.count(Some(session_id)).await?;
        let l3_episodes = self.l3.count_by_session(session_id).await?;
        let l4_docs = self
            .l4
            .count(Some(&crate::storage::filter::eq_clause(
                "session_id",
                session_id,
            )))
            .await?;
        Ok(MemoryState {
            session_id: session_id.to_string(),
            l1_turns,
            l2_facts,
            l3_episodes,
            l4_docs,
        })
    }

    /// Aggregate health: healthy iff all tiers and the LLM client are
    /// healthy; degraded when part of the system still works; unhealthy
    /// otherwise.
    pub async fn health_check(&self) -> SystemHealth {
        let tiers = vec![
            self.l1.health_check().await,
            self.l2.health_check().await,
            self.l3.health_check().await,
            self.l4.health_check().await,
        ];
        let llm_providers = self.llm.health_check().await;

        let tier_healthy = tiers
            .iter()
            .filter(|tier| tier.status == HealthStatus::Healthy)
            .count();
        let llm_healthy =
            llm_providers.is_empty() || llm_providers.iter().any(|provider| provider.healthy);

        let status = if tier_healthy == tiers.len() && llm_healthy {
            HealthStatus::Healthy
        } else if tier_healthy > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        SystemHealth {
            status,
            tiers,
            llm_providers,
        }
    }
}
