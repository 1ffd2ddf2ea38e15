//! Distillation engine (L3 → L4): aggregate episodes and synthesize one
//! knowledge document per template type.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::lifecycle::{LifecycleEvent, LifecycleSink};
use crate::llm::{GenerateOptions, LlmClient};
use crate::models::{Episode, KnowledgeDocument, KnowledgeType};
use crate::tiers::{EpisodicMemoryTier, SemanticMemoryTier};

use super::CycleStatus;

/// Maximum distinct entities carried into document metadata.
const MAX_METADATA_ENTITIES: usize = 20;

/// One knowledge-type template.
#[derive(Debug, Clone)]
pub struct KnowledgeTemplate {
    pub knowledge_type: KnowledgeType,
    pub description: String,
    pub instruction: String,
}

impl KnowledgeTemplate {
    fn defaults() -> Vec<Self> {
        vec![
            Self {
                knowledge_type: KnowledgeType::Summary,
                description: "Condensed overview of episode(s)".to_string(),
                instruction: "Summarize the key facts and outcomes from these episodes in 2-3 \
                              sentences."
                    .to_string(),
            },
            Self {
                knowledge_type: KnowledgeType::Insight,
                description: "Deeper analysis or pattern recognition".to_string(),
                instruction: "Identify non-obvious patterns, correlations, or insights from \
                              these episodes."
                    .to_string(),
            },
            Self {
                knowledge_type: KnowledgeType::Pattern,
                description: "Recurring behavior or trend".to_string(),
                instruction: "Describe recurring patterns, common sequences, or typical \
                              workflows observed."
                    .to_string(),
            },
            Self {
                knowledge_type: KnowledgeType::Recommendation,
                description: "Actionable advice or best practice".to_string(),
                instruction: "Based on these episodes, what recommendations or best practices \
                              can be extracted?"
                    .to_string(),
            },
            Self {
                knowledge_type: KnowledgeType::Rule,
                description: "Explicit rule or constraint".to_string(),
                instruction: "Extract any explicit rules, policies, or constraints mentioned \
                              or implied."
                    .to_string(),
            },
        ]
    }
}

/// Distillation configuration.
#[derive(Debug, Clone)]
pub struct DistillationConfig {
    /// Minimum candidate episodes before a cycle runs
    pub episode_threshold: usize,
    /// Max episodes aggregated per cycle
    pub max_episodes: usize,
    pub model: Option<String>,
    pub domain: String,
    pub templates: Vec<KnowledgeTemplate>,
    /// Episode metadata keys aggregated into document facets
    pub metadata_facets: Vec<String>,
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            episode_threshold: 5,
            max_episodes: 20,
            model: None,
            domain: "default".to_string(),
            templates: KnowledgeTemplate::defaults(),
            metadata_facets: vec!["location_code".to_string(), "customer_code".to_string()],
        }
    }
}

/// Request options for one distillation cycle.
#[derive(Debug, Clone, Default)]
pub struct DistillationRequest {
    pub session_id: Option<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Bypass the episode-count gate
    pub force: bool,
}

/// Stats record for one distillation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DistillationStats {
    #[serde(flatten)]
    pub status: CycleStatus,
    pub episodes_processed: usize,
    pub documents_created: usize,
    pub errors: usize,
    pub last_error: Option<String>,
}

impl DistillationStats {
    fn new() -> Self {
        Self {
            status: CycleStatus::Completed,
            episodes_processed: 0,
            documents_created: 0,
            errors: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn skipped(reason: &str) -> Self {
        Self {
            status: CycleStatus::Skipped(reason.to_string()),
            ..Self::new()
        }
    }
}

/// Distills episodic memory into durable knowledge documents.
pub struct DistillationEngine {
    l3: Arc<EpisodicMemoryTier>,
    l4: Arc<SemanticMemoryTier>,
    llm: Arc<LlmClient>,
    lifecycle: Option<Arc<dyn LifecycleSink>>,
    config: DistillationConfig,
}

impl DistillationEngine {
    #[must_use]
    pub fn new(
        l3: Arc<EpisodicMemoryTier>,
        l4: Arc<SemanticMemoryTier>,
        llm: Arc<LlmClient>,
        config: DistillationConfig,
    ) -> Self {
        Self {
            l3,
            l4,
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

    fn publish(&self, event_type: &str, session_id: &str, data: Value) {
        if let Some(sink) = &self.lifecycle {
            sink.publish(LifecycleEvent::new(event_type, session_id, data));
        }
    }

    /// Run one distillation cycle. A per-type synthesis failure is logged
    /// and skipped.
    pub async fn process(&self, request: &DistillationRequest) -> DistillationStats {
        let mut stats = DistillationStats::new();
        let session_label = request.session_id.as_deref().unwrap_or("all");
        self.publish("distillation_start", session_label, json!({}));

        let episodes = match self.candidate_episodes(request).await {
            Ok(episodes) => episodes,
            Err(e) => {
                warn!("Distillation could not read L3: {e}");
                stats.errors += 1;
                stats.last_error = Some(e.to_string());
                return stats;
            }
        };

        if !request.force && episodes.len() < self.config.episode_threshold {
            info!(
                "Episode count {} below threshold {}; skipping distillation",
                episodes.len(),
                self.config.episode_threshold
            );
            return DistillationStats {
                episodes_processed: episodes.len(),
                ..DistillationStats::skipped("below_threshold")
            };
        }
        if episodes.is_empty() {
            return DistillationStats::skipped("no_episodes");
        }
        stats.episodes_processed = episodes.len();

        for template in &self.config.templates {
            match self
                .create_document(&episodes, template, request.session_id.as_deref())
                .await
            {
                Ok(knowledge_id) => {
                    info!(
                        "Distilled {} episodes into {} document {knowledge_id}",
                        episodes.len(),
                        template.knowledge_type
                    );
                    stats.documents_created += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to create {} document: {e}",
                        template.knowledge_type
                    );
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }

        self.publish(
            "distillation_end",
            session_label,
            json!({
                "episodes_processed": stats.episodes_processed,
                "documents_created": stats.documents_created,
                "errors": stats.errors,
            }),
        );
        stats
    }

    async fn candidate_episodes(&self, request: &DistillationRequest) -> Result<Vec<Episode>> {
        let episodes = if let Some(session_id) = &request.session_id {
            self.l3
                .episodes_by_session(session_id, self.config.max_episodes)
                .await?
        } else {
            self.l3
                .query_temporal(Utc::now(), None, self.config.max_episodes)
                .await?
        };

        Ok(match request.time_range {
            Some((start, end)) => episodes
                .into_iter()
                .filter(|e| e.time_window_end >= start && e.time_window_start <= end)
                .collect(),
            None => episodes,
        })
    }

    async fn create_document(
        &self,
        episodes: &[Episode],
        template: &KnowledgeTemplate,
        session_id: Option<&str>,
    ) -> Result<String> {
        // Compact projection: id + summary + entity sample per episode
        let episode_context: String = episodes
            .iter()
            .enumerate()
            .map(|(i, episode)| {
                let entities: Vec<&str> = episode
                    .entities
                    .iter()
                    .take(5)
                    .map(|e| e.name.as_str())
                    .collect();
                format!(
                    "Episode {} (ID: {}):\nSummary: {}\nFacts: {} facts\nEntities: {}\n\n",
                    i + 1,
                    episode.episode_id,
                    episode.summary,
                    episode.source_fact_ids.len(),
                    entities.join(", ")
                )
            })
            .collect();

        let prompt = format!(
            "{}\n\nContext from {} episode(s):\n\n{episode_context}\
             Provide a structured response with the following fields:\n\
             - content: The main knowledge content\n\
             - title: A concise title (max 100 characters)\n\
             - key_points: List of 3-5 key points (as bullet points)\n",
            template.instruction,
            episodes.len()
        );

        let mut options = GenerateOptions::default()
            .with_temperature(0.3)
            .with_max_output_tokens(1024);
        options.model.clone_from(&self.config.model);

        let response = self.llm.generate(&prompt, &options).await?;
        let (content, title, key_points) =
            parse_reply(&response.text, template.knowledge_type);

        let mut metadata = self.aggregate_metadata(episodes);
        metadata.insert("key_points".to_string(), json!(key_points));

        let knowledge_id = format!(
            "know_{}_{}",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            template.knowledge_type
        );
        let mut document = KnowledgeDocument::new(
            knowledge_id,
            title,
            content,
            template.knowledge_type,
            episodes.iter().map(|e| e.episode_id.clone()).collect(),
        )
        .with_domain(self.config.domain.clone())
        .with_metadata(metadata);
        if let Some(session_id) = session_id {
            document = document.with_session(session_id);
        }

        self.l4.store(&document).await
    }

    /// Aggregate facet fields and entity names across episodes.
    fn aggregate_metadata(&self, episodes: &[Episode]) -> serde_json::Map<String, Value> {
        let mut metadata = serde_json::Map::new();

        for facet in &self.config.metadata_facets {
            let mut values: Vec<Value> = Vec::new();
            for episode in episodes {
                if let Some(value) = episode.metadata.get(facet) {
                    if !value.is_null() && !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
            match values.len() {
                0 => {}
                1 => {
                    metadata.insert(facet.clone(), values.remove(0));
                }
                _ => {
                    metadata.insert(facet.clone(), Value::Array(values));
                }
            }
        }

        // Deduplicated entity sample across all episodes
        let mut seen = BTreeMap::new();
        for episode in episodes {
            for entity in &episode.entities {
                seen.entry(entity.name.clone())
                    .or_insert_with(|| entity.entity_type.clone());
            }
        }
        let entities: Vec<Value> = seen
            .into_iter()
            .take(MAX_METADATA_ENTITIES)
            .map(|(name, entity_type)| json!({"name": name, "type": entity_type}))
            .collect();
        metadata.insert("entities".to_string(), Value::Array(entities));
        metadata.insert("source_episode_count".to_string(), json!(episodes.len()));

        metadata
    }
}

/// Best-effort parse of the synthesis reply into (content, title,
/// key points). Title and key points are optional.
fn parse_reply(response: &str, knowledge_type: KnowledgeType) -> (String, String, Vec<String>) {
    let content = response.trim().to_string();
    let type_name = knowledge_type.as_str();
    let mut title = {
        let mut chars = type_name.chars();
        chars.next().map_or_else(
            || "Knowledge".to_string(),
            |c| format!("{}{} Knowledge", c.to_uppercase(), chars.as_str()),
        )
    };
    let mut key_points = Vec::new();

    for line in response.lines() {
        if line.to_lowercase().starts_with("title:") {
            if let Some((_, value)) = line.split_once(':') {
                let value = value.trim().trim_matches('*').trim();
                if !value.is_empty() {
                    title = value.to_string();
                }
            }
            break;
        }
    }

    let mut in_key_points = false;
    for line in response.lines() {
        let lower = line.to_lowercase();
        if lower.contains("key_points:") || lower.contains("key points:") {
            in_key_points = true;
            continue;
        }
        if in_key_points {
            let trimmed = line.trim();
            if let Some(point) = trimmed
                .strip_prefix('-')
                .or_else(|| trimmed.strip_prefix('•'))
            {
                let point = point.trim();
                if !point.is_empty() {
                    key_points.push(point.to_string());
                }
            } else if !trimmed.is_empty() {
                break;
            }
        }
    }

    (content, title, key_points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::QueueProvider;
    use crate::metrics::MetricsCollector;
    use crate::models::EntityRef;
    use crate::storage::memory::{
        InMemoryFullTextStore, InMemoryGraphStore, InMemoryVectorStore,
    };
    use crate::tiers::{EpisodicConfig, SemanticConfig};

    struct Fixture {
        engine: DistillationEngine,
        l3: Arc<EpisodicMemoryTier>,
        l4: Arc<SemanticMemoryTier>,
    }

    fn fixture(provider: QueueProvider, config: DistillationConfig) -> Fixture {
        let metrics = Arc::new(MetricsCollector::default());
        let l3 = Arc::new(EpisodicMemoryTier::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(InMemoryGraphStore::new()),
            Arc::clone(&metrics),
            EpisodicConfig {
                vector_size: 8,
                ..EpisodicConfig::default()
            },
        ));
        let l4 = Arc::new(SemanticMemoryTier::new(
            Arc::new(InMemoryFullTextStore::new()),
            metrics,
            SemanticConfig::default(),
        ));

        let client = LlmClient::new();
        client.register_provider(Arc::new(provider), None);

        let engine = DistillationEngine::new(
            Arc::clone(&l3),
            Arc::clone(&l4),
            Arc::new(client),
            config,
        );
        Fixture { engine, l3, l4 }
    }

    async fn seed_episode(l3: &EpisodicMemoryTier, session: &str, facet: Option<&str>) {
        let end = Utc::now();
        let start = end - chrono::Duration::hours(2);
        let mut episode = Episode::new(session, "Rail booked for the inland leg", start, end)
            .with_source_facts(vec!["f1".to_string()])
            .with_entities(vec![EntityRef::new("DB Cargo", "organization")]);
        if let Some(code) = facet {
            episode
                .metadata
                .insert("location_code".to_string(), json!(code));
        }
        l3.store(&mut episode, vec![0.5; 8]).await.unwrap();
    }

    #[tokio::test]
    async fn below_threshold_skips_unless_forced() {
        let provider = QueueProvider::new("mock", 8);
        for _ in 0..5 {
            provider.push_text("Title: Forced insight\nSome content.");
        }
        let f = fixture(provider, DistillationConfig::default());
        f.l3.initialize().await.unwrap();
        f.l4.initialize().await.unwrap();
        seed_episode(&f.l3, "s1", None).await;

        let stats = f.engine.process(&DistillationRequest::default()).await;
        assert_eq!(stats.status, CycleStatus::Skipped("below_threshold".to_string()));
        assert_eq!(stats.documents_created, 0);

        let forced = f
            .engine
            .process(&DistillationRequest {
                force: true,
                ..DistillationRequest::default()
            })
            .await;
        assert_eq!(forced.status, CycleStatus::Completed);
        assert_eq!(forced.documents_created, 5);
    }

    #[tokio::test]
    async fn creates_one_document_per_template_with_provenance() {
        let provider = QueueProvider::new("mock", 8);
        for _ in 0..5 {
            provider.push_text(
                "content: Customers on this lane favor rail.\nTitle: Lane modal split\n\
                 key_points:\n- rail favored\n- cost driven",
            );
        }
        let mut config = DistillationConfig::default();
        config.episode_threshold = 2;
        let f = fixture(provider, config);
        f.l3.initialize().await.unwrap();
        f.l4.initialize().await.unwrap();
        seed_episode(&f.l3, "s1", Some("NLRTM")).await;
        seed_episode(&f.l3, "s1", Some("DEHAM")).await;

        let stats = f
            .engine
            .process(&DistillationRequest {
                session_id: Some("s1".to_string()),
                ..DistillationRequest::default()
            })
            .await;
        assert_eq!(stats.episodes_processed, 2);
        assert_eq!(stats.documents_created, 5);
        assert_eq!(stats.errors, 0);

        let hits = f
            .l4
            .search(&crate::models::KnowledgeQuery::default().with_limit(20), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);
        for hit in &hits {
            assert_eq!(hit.document.source_episode_ids.len(), 2);
            assert_eq!(hit.document.session_id.as_deref(), Some("s1"));
            // Facet aggregation keeps both distinct values
            let codes = hit.document.metadata.get("location_code").unwrap();
            assert!(codes.is_array());
        }
    }

    #[tokio::test]
    async fn per_type_failure_is_counted_and_skipped() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text("Title: ok\ncontent one");
        provider.push_error("rate limited");
        provider.push_text("Title: ok\ncontent two");
        provider.push_text("Title: ok\ncontent three");
        provider.push_text("Title: ok\ncontent four");
        let mut config = DistillationConfig::default();
        config.episode_threshold = 1;
        let f = fixture(provider, config);
        f.l3.initialize().await.unwrap();
        f.l4.initialize().await.unwrap();
        seed_episode(&f.l3, "s1", None).await;

        let stats = f.engine.process(&DistillationRequest::default()).await;
        assert_eq!(stats.documents_created, 4);
        assert_eq!(stats.errors, 1);
        assert!(stats.last_error.is_some());
    }

    #[test]
    fn reply_parsing_extracts_title_and_key_points() {
        let (content, title, key_points) = parse_reply(
            "Some synthesized knowledge.\nTitle: Modal preferences\nkey points:\n- first\n- second\nTrailing text",
            KnowledgeType::Insight,
        );
        assert!(content.contains("Some synthesized knowledge"));
        assert_eq!(title, "Modal preferences");
        assert_eq!(key_points, vec!["first", "second"]);
    }

    #[test]
    fn reply_parsing_defaults_without_structure() {
        let (content, title, key_points) = parse_reply("Just prose.", KnowledgeType::Rule);
        assert_eq!(content, "Just prose.");
        assert_eq!(title, "Rule Knowledge");
        assert!(key_points.is_empty());
    }
}
