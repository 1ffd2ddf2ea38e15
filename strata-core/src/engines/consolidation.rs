//! Consolidation engine (L2 → L3): cluster facts by time, synthesize an
//! episode summary and narrative, embed, and dual-index.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::lifecycle::{LifecycleEvent, LifecycleSink};
use crate::llm::{strip_code_fences, GenerateOptions, LlmClient};
use crate::models::{EntityRef, Episode, Fact, FactQuery, FactType};
use crate::tiers::{EpisodicMemoryTier, WorkingMemoryTier};

use super::CycleStatus;

/// Consolidation configuration.
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Time-gap window for clustering and the default lookback
    pub time_window_hours: i64,
    pub summary_model: Option<String>,
    pub embedding_model: Option<String>,
    /// Max facts pulled per cycle
    pub max_facts: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            time_window_hours: 24,
            summary_model: None,
            embedding_model: None,
            max_facts: 200,
        }
    }
}

/// Stats record for one consolidation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationStats {
    pub session_id: String,
    #[serde(flatten)]
    pub status: CycleStatus,
    pub facts_retrieved: usize,
    pub episodes_created: usize,
    pub errors: usize,
    pub last_error: Option<String>,
}

impl ConsolidationStats {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: CycleStatus::Completed,
            facts_retrieved: 0,
            episodes_created: 0,
            errors: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn skipped(session_id: &str, reason: &str) -> Self {
        Self {
            status: CycleStatus::Skipped(reason.to_string()),
            ..Self::new(session_id)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: Option<String>,
    narrative: Option<String>,
}

/// Consolidates Working Memory facts into Episodic Memory episodes.
pub struct ConsolidationEngine {
    l2: Arc<WorkingMemoryTier>,
    l3: Arc<EpisodicMemoryTier>,
    llm: Arc<LlmClient>,
    lifecycle: Option<Arc<dyn LifecycleSink>>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    #[must_use]
    pub fn new(
        l2: Arc<WorkingMemoryTier>,
        l3: Arc<EpisodicMemoryTier>,
        llm: Arc<LlmClient>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            l2,
            l3,
            llm,
            lifecycle: None,
            config,
        }
    }

    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn LifecycleSink>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    fn publish(&self, event_type: &str, session_id: &str, data: serde_json::Value) {
        if let Some(sink) = &self.lifecycle {
            sink.publish(LifecycleEvent::new(event_type, session_id, data));
        }
    }

    /// Run one consolidation cycle for a session. A failure creating one
    /// episode does not abort the batch.
    pub async fn process_session(&self, session_id: &str) -> ConsolidationStats {
        let mut stats = ConsolidationStats::new(session_id);
        self.publish("consolidation_start", session_id, json!({}));

        // Cursor: last consolidated window end, else one window back
        let cursor = match self.l3.last_consolidation_time(session_id).await {
            Ok(Some(last)) => last,
            Ok(None) => Utc::now() - Duration::hours(self.config.time_window_hours),
            Err(e) => {
                warn!("Consolidation cursor lookup failed for {session_id}: {e}");
                stats.errors += 1;
                stats.last_error = Some(e.to_string());
                Utc::now() - Duration::hours(self.config.time_window_hours)
            }
        };
        let now = Utc::now();

        let query = FactQuery::for_session(session_id)
            .with_time_range(cursor, now)
            .with_limit(self.config.max_facts);
        let facts = match self.l2.query(&query).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!("Consolidation could not read L2 for {session_id}: {e}");
                stats.errors += 1;
                stats.last_error = Some(e.to_string());
                return stats;
            }
        };
        stats.facts_retrieved = facts.len();
        if facts.is_empty() {
            return stats;
        }

        for cluster in cluster_by_time(facts, self.config.time_window_hours) {
            match self.create_episode(session_id, &cluster).await {
                Ok(episode_id) => {
                    debug!("Consolidated {} facts into episode {episode_id}", cluster.len());
                    stats.episodes_created += 1;
                }
                Err(e) => {
                    warn!("Error creating episode for {session_id}: {e}");
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        info!(
            "Consolidation cycle for {session_id}: {} facts, {} episodes, {} errors",
            stats.facts_retrieved, stats.episodes_created, stats.errors
        );
        self.publish(
            "consolidation_end",
            session_id,
            json!({
                "facts_retrieved": stats.facts_retrieved,
                "episodes_created": stats.episodes_created,
                "errors": stats.errors,
            }),
        );
        stats
    }

    async fn create_episode(&self, session_id: &str, facts: &[Fact]) -> Result<String> {
        let (summary, narrative) = self.summarize(facts).await;

        let window_start = facts
            .iter()
            .map(|f| f.extracted_at)
            .min()
            .unwrap_or_else(Utc::now);
        let window_end = facts
            .iter()
            .map(|f| f.extracted_at)
            .max()
            .unwrap_or_else(Utc::now);
        let importance =
            facts.iter().map(|f| f.ciar_score).sum::<f64>() / facts.len() as f64;

        let mut episode = Episode::new(session_id, summary, window_start, window_end)
            .with_narrative(narrative)
            .with_source_facts(facts.iter().map(|f| f.fact_id.clone()).collect())
            .with_importance(importance)
            .with_entities(entities_from_facts(facts));
        episode.embedding_model.clone_from(&self.config.embedding_model);
        episode.topics = facts
            .iter()
            .filter_map(|f| f.topic_label.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let embed_text = format!(
            "{}. {}",
            episode.summary,
            episode.narrative.as_deref().unwrap_or_default()
        );
        let embedding = self
            .llm
            .embed(&embed_text, self.config.embedding_model.as_deref())
            .await?;

        self.l3.store(&mut episode, embedding).await
    }

    /// Ask the LLM for a summary + narrative; fall back to a counting
    /// summary on any failure.
    async fn summarize(&self, facts: &[Fact]) -> (String, String) {
        let facts_text: String = facts
            .iter()
            .map(|f| {
                format!(
                    "- {} (certainty: {:.2}, impact: {:.2})\n",
                    f.content, f.certainty, f.impact
                )
            })
            .collect();

        let prompt = format!(
            "Given the following facts from a conversation, create a brief summary and \
             narrative:\n\nFacts:\n{facts_text}\nProvide:\n1. A one-sentence summary\n\
             2. A brief narrative (2-3 sentences) describing what happened\n\n\
             Format as JSON:\n{{\n    \"summary\": \"...\",\n    \"narrative\": \"...\"\n}}"
        );

        let mut options = GenerateOptions::default()
            .with_temperature(0.3)
            .with_max_output_tokens(512);
        options.model.clone_from(&self.config.summary_model);

        let fallback = || {
            (
                format!("Episode with {} facts", facts.len()),
                "Consolidation of facts from conversation.".to_string(),
            )
        };

        match self.llm.generate(&prompt, &options).await {
            Ok(response) => {
                match serde_json::from_str::<SummaryReply>(strip_code_fences(&response.text)) {
                    Ok(reply) => {
                        let summary = reply
                            .summary
                            .filter(|s| s.len() >= 10)
                            .unwrap_or_else(|| fallback().0);
                        let narrative = reply.narrative.unwrap_or_else(|| fallback().1);
                        (summary, narrative)
                    }
                    Err(e) => {
                        warn!("Failed to parse episode summary reply: {e}");
                        fallback()
                    }
                }
            }
            Err(e) => {
                warn!("Episode summary generation failed: {e}");
                fallback()
            }
        }
    }
}

/// Cluster facts by extraction-time gaps: a new cluster starts when the
/// gap from the current cluster's start exceeds the window.
fn cluster_by_time(mut facts: Vec<Fact>, window_hours: i64) -> Vec<Vec<Fact>> {
    if facts.is_empty() {
        return Vec::new();
    }
    facts.sort_by_key(|f| f.extracted_at);

    let mut clusters = Vec::new();
    let mut current = vec![facts[0].clone()];
    let mut window_start = facts[0].extracted_at;

    for fact in facts.into_iter().skip(1) {
        if fact.extracted_at - window_start <= Duration::hours(window_hours) {
            current.push(fact);
        } else {
            clusters.push(std::mem::take(&mut current));
            window_start = fact.extracted_at;
            current.push(fact);
        }
    }
    clusters.push(current);
    clusters
}

/// Derive entity nodes from entity/relationship facts in the cluster.
fn entities_from_facts(facts: &[Fact]) -> Vec<EntityRef> {
    facts
        .iter()
        .filter(|f| {
            matches!(
                f.fact_type,
                Some(FactType::Entity | FactType::Relationship)
            )
        })
        .map(|f| {
            let name = f
                .metadata
                .get("entity_name")
                .and_then(serde_json::Value::as_str)
                .map_or_else(
                    || f.content.chars().take(80).collect::<String>(),
                    ToString::to_string,
                );
            let entity_type = f
                .fact_category
                .map_or("unknown", |c| c.as_str())
                .to_string();
            EntityRef::new(name, entity_type).with_confidence(f.certainty)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::QueueProvider;
    use crate::metrics::MetricsCollector;
    use crate::storage::memory::{
        InMemoryGraphStore, InMemoryRelationalStore, InMemoryVectorStore,
    };
    use crate::tiers::{EpisodicConfig, WorkingMemoryConfig};

    struct Fixture {
        engine: ConsolidationEngine,
        l2: Arc<WorkingMemoryTier>,
        l3: Arc<EpisodicMemoryTier>,
    }

    fn fixture(provider: QueueProvider) -> Fixture {
        let metrics = Arc::new(MetricsCollector::default());
        let l2 = Arc::new(WorkingMemoryTier::new(
            Arc::new(InMemoryRelationalStore::new()),
            Arc::clone(&metrics),
            WorkingMemoryConfig::default(),
        ));
        let l3 = Arc::new(EpisodicMemoryTier::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryGraphStore::new()),
            metrics,
            EpisodicConfig {
                vector_size: 8,
                ..EpisodicConfig::default()
            },
        ));

        let client = LlmClient::new();
        client.register_provider(Arc::new(provider), None);

        let engine = ConsolidationEngine::new(
            Arc::clone(&l2),
            Arc::clone(&l3),
            Arc::new(client),
            ConsolidationConfig::default(),
        );
        Fixture { engine, l2, l3 }
    }

    async fn seed_fact(l2: &WorkingMemoryTier, content: &str, hours_ago: i64) -> String {
        let fact = Fact::new("s1", content)
            .with_components(1.0, 0.8)
            .with_extracted_at(Utc::now() - Duration::hours(hours_ago));
        l2.store(&fact).await.unwrap()
    }

    #[tokio::test]
    async fn consolidates_facts_into_a_dual_indexed_episode() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text(
            r#"{"summary": "Customer locked in rail routing for Q3", "narrative": "Over the session the customer settled on rail."}"#,
        );
        let f = fixture(provider);
        f.l3.initialize().await.unwrap();

        seed_fact(&f.l2, "Customer prefers rail", 2).await;
        seed_fact(&f.l2, "Budget capped at 40k", 1).await;

        let stats = f.engine.process_session("s1").await;
        assert_eq!(stats.status, CycleStatus::Completed);
        assert_eq!(stats.facts_retrieved, 2);
        assert_eq!(stats.episodes_created, 1);
        assert_eq!(stats.errors, 0);

        let episodes = f.l3.episodes_by_session("s1", 10).await.unwrap();
        assert_eq!(episodes.len(), 1);
        let episode = f.l3.retrieve(&episodes[0].episode_id).await.unwrap().unwrap();
        assert_eq!(episode.summary, "Customer locked in rail routing for Q3");
        assert_eq!(episode.fact_count, 2);
        assert!(episode.fact_valid_from <= episode.source_observation_timestamp);
        // importance = mean ciar of members (both 0.8)
        assert!((episode.importance_score - 0.8).abs() < 0.01);
    }

    #[tokio::test]
    async fn summary_parse_failure_uses_counting_fallback() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text("not json");
        let f = fixture(provider);
        f.l3.initialize().await.unwrap();

        seed_fact(&f.l2, "A significant fact", 2).await;

        let stats = f.engine.process_session("s1").await;
        assert_eq!(stats.episodes_created, 1);

        let episodes = f.l3.episodes_by_session("s1", 10).await.unwrap();
        assert_eq!(episodes[0].summary, "Episode with 1 facts");
    }

    #[tokio::test]
    async fn embedding_failure_counts_error_without_aborting() {
        let provider = QueueProvider::new("mock", 8).failing_embeddings();
        provider.push_text(r#"{"summary": "A long enough summary here", "narrative": "n"}"#);
        let f = fixture(provider);
        f.l3.initialize().await.unwrap();

        seed_fact(&f.l2, "A significant fact", 2).await;

        let stats = f.engine.process_session("s1").await;
        assert_eq!(stats.episodes_created, 0);
        assert_eq!(stats.errors, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn no_facts_means_no_episodes() {
        let provider = QueueProvider::new("mock", 8);
        let f = fixture(provider);
        f.l3.initialize().await.unwrap();

        let stats = f.engine.process_session("s1").await;
        assert_eq!(stats.facts_retrieved, 0);
        assert_eq!(stats.episodes_created, 0);
    }

    #[test]
    fn clustering_splits_on_time_gaps() {
        let base = Utc::now();
        let mk = |hours: i64| {
            Fact::new("s1", format!("fact at {hours}"))
                .with_components(1.0, 0.8)
                .with_extracted_at(base + Duration::hours(hours))
        };
        let clusters = cluster_by_time(vec![mk(0), mk(1), mk(30), mk(31)], 24);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(clusters[1].len(), 2);
    }

    #[test]
    fn entity_facts_become_graph_entities() {
        let mut fact = Fact::new("s1", "ACME Logistics BV")
            .with_components(0.9, 0.6)
            .with_type(FactType::Entity)
            .with_category(crate::models::FactCategory::Business);
        fact.metadata
            .insert("entity_name".to_string(), json!("ACME Logistics"));

        let entities = entities_from_facts(&[fact, Fact::new("s1", "noise")]);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "ACME Logistics");
        assert_eq!(entities[0].entity_type, "business");
    }
}
