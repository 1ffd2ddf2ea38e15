//! L3 Episodic Memory: consolidated episodes, dual-indexed.
//!
//! Every episode lives in two indexes under a shared identifier: a vector
//! point carrying the full payload and a graph node with MENTIONS edges to
//! entity nodes. The store flow is vector upsert → graph node → entity
//! edges → vector-id backref; the pair is eventually consistent on failure
//! and `reconcile` surfaces drift for the operator.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result, TierKind};
use crate::metrics::MetricsCollector;
use crate::models::Episode;
use crate::storage::{GraphEpisode, GraphStore, PayloadFilter, VectorPoint, VectorStore};
use crate::tiers::TierHealth;

const TIER: TierKind = TierKind::L3EpisodicMemory;

/// L3 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicConfig {
    pub collection: String,
    pub vector_size: usize,
    /// Reject mismatched embeddings instead of padding/truncating
    pub strict_vector_size: bool,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            collection: "episodes".to_string(),
            vector_size: 768,
            strict_vector_size: false,
        }
    }
}

/// A similarity hit carrying the decoded episode.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeMatch {
    pub episode: Episode,
    pub similarity_score: f32,
}

/// Episodes present in one index but missing from the other.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    /// In the vector index, missing from the graph
    pub missing_in_graph: Vec<String>,
    /// In the graph, missing from the vector index
    pub missing_in_vector: Vec<String>,
    /// Graph nodes whose vector-id backref never landed
    pub missing_vector_backref: Vec<String>,
}

impl ReconciliationReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing_in_graph.is_empty()
            && self.missing_in_vector.is_empty()
            && self.missing_vector_backref.is_empty()
    }
}

/// L3: Episodic Memory tier.
pub struct EpisodicMemoryTier {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    metrics: Arc<MetricsCollector>,
    config: EpisodicConfig,
}

impl EpisodicMemoryTier {
    #[must_use]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        metrics: Arc<MetricsCollector>,
        config: EpisodicConfig,
    ) -> Self {
        info!(
            "L3 EpisodicMemoryTier initialized: collection={}, vector_size={}",
            config.collection, config.vector_size
        );
        Self {
            vector,
            graph,
            metrics,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EpisodicConfig {
        &self.config
    }

    /// Idempotently create the vector collection.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when creation fails.
    pub async fn initialize(&self) -> Result<()> {
        self.vector
            .ensure_collection(&self.config.collection, self.config.vector_size)
            .await
            .map_err(|e| Error::tier(TIER, "initialize", e))
    }

    fn fit_embedding(&self, mut embedding: Vec<f32>) -> Result<Vec<f32>> {
        let expected = self.config.vector_size;
        if embedding.len() == expected {
            return Ok(embedding);
        }
        if self.config.strict_vector_size {
            return Err(Error::Data(format!(
                "embedding of size {} required, got {}",
                expected,
                embedding.len()
            )));
        }
        if embedding.len() > expected {
            embedding.truncate(expected);
        } else {
            embedding.resize(expected, 0.0);
        }
        Ok(embedding)
    }

    /// Store an episode into both indexes.
    ///
    /// Writes back `vector_id` and `graph_node_id` onto the episode and
    /// returns the episode id. A failure after the vector upsert leaves a
    /// recoverable inconsistency visible to [`Self::reconcile`].
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error on validation or index failures.
    pub async fn store(&self, episode: &mut Episode, embedding: Vec<f32>) -> Result<String> {
        let started = Instant::now();
        let result = self.store_inner(episode, embedding).await;
        self.metrics.observe("l3_store", started, &result);
        result
    }

    async fn store_inner(&self, episode: &mut Episode, embedding: Vec<f32>) -> Result<String> {
        episode
            .validate()
            .map_err(|e| Error::tier(TIER, "store", e))?;
        let embedding = self
            .fit_embedding(embedding)
            .map_err(|e| Error::tier(TIER, "store", e))?;

        self.vector
            .ensure_collection(&self.config.collection, self.config.vector_size)
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;

        // 1. Vector index first; its point id becomes the cross-reference
        let vector_id = Uuid::new_v4().to_string();
        episode.vector_id = Some(vector_id.clone());
        let payload = episode
            .vector_payload()
            .map_err(|e| Error::tier(TIER, "store", e))?;
        self.vector
            .upsert_point(
                &self.config.collection,
                VectorPoint {
                    id: vector_id.clone(),
                    vector: embedding,
                    payload,
                },
            )
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;
        debug!("Upserted vector point {vector_id} for episode {}", episode.episode_id);

        // 2. Graph node (MERGE by episodeId)
        let node_id = self
            .graph
            .upsert_episode_node(&GraphEpisode::from_episode(episode))
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;
        episode.graph_node_id = Some(node_id);

        // 3. Entity nodes + MENTIONS edges carrying the bi-temporal triple
        for entity in &episode.entities {
            let edge = episode.mention_edge(entity.confidence);
            self.graph
                .upsert_entity_mention(&episode.episode_id, entity, &edge)
                .await
                .map_err(|e| Error::tier(TIER, "store", e))?;
        }

        // 4. Close the cross-reference
        self.graph
            .set_episode_vector_id(&episode.episode_id, &vector_id)
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;

        info!(
            "Stored episode {} dual-indexed (vector {vector_id})",
            episode.episode_id
        );
        Ok(episode.episode_id.clone())
    }

    /// Retrieve an episode from the graph index.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the lookup fails.
    pub async fn retrieve(&self, episode_id: &str) -> Result<Option<Episode>> {
        let started = Instant::now();
        let result = self.retrieve_inner(episode_id).await;
        self.metrics.observe("l3_retrieve", started, &result);
        result
    }

    async fn retrieve_inner(&self, episode_id: &str) -> Result<Option<Episode>> {
        let Some(node) = self
            .graph
            .get_episode_node(episode_id)
            .await
            .map_err(|e| Error::tier(TIER, "retrieve", e))?
        else {
            return Ok(None);
        };

        // Prefer the full payload from the vector index when the
        // cross-reference is intact
        if let Some(vector_id) = &node.vector_id {
            match self
                .vector
                .retrieve_point(&self.config.collection, vector_id)
                .await
            {
                Ok(Some(point)) => {
                    if let Ok(episode) = serde_json::from_value::<Episode>(point.payload) {
                        return Ok(Some(episode));
                    }
                }
                Ok(None) => {
                    warn!("Vector point {vector_id} missing for episode {episode_id}");
                }
                Err(e) => warn!("Vector lookup failed for episode {episode_id}: {e}"),
            }
        }

        Ok(Some(episode_from_node(&node)))
    }

    /// Similarity search over the vector index; an optional session filter
    /// restricts candidates before scoring.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the search fails.
    pub async fn search_similar(
        &self,
        embedding: &[f32],
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodeMatch>> {
        let started = Instant::now();
        let result = self.search_similar_inner(embedding, session_id, limit).await;
        self.metrics.observe("l3_search_similar", started, &result);
        result
    }

    async fn search_similar_inner(
        &self,
        embedding: &[f32],
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodeMatch>> {
        let filter = session_id.map(|session| {
            PayloadFilter::new().must_match("session_id", session)
        });

        let hits = self
            .vector
            .search_by_vector(
                &self.config.collection,
                embedding,
                filter.as_ref(),
                limit,
            )
            .await
            .map_err(|e| Error::tier(TIER, "search_similar", e))?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                serde_json::from_value::<Episode>(hit.payload)
                    .ok()
                    .map(|episode| EpisodeMatch {
                        episode,
                        similarity_score: hit.score,
                    })
            })
            .collect())
    }

    /// Episodes whose valid-time interval contains `query_time`, ordered by
    /// importance.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn query_temporal(
        &self,
        query_time: DateTime<Utc>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        let started = Instant::now();
        let result = self
            .graph
            .query_temporal(query_time, session_id, limit)
            .await
            .map(|nodes| nodes.iter().map(episode_from_node).collect())
            .map_err(|e| Error::tier(TIER, "query_temporal", e));
        self.metrics.observe("l3_query_temporal", started, &result);
        result
    }

    /// Recent episodes of a session, newest window first.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn episodes_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Episode>> {
        self.graph
            .episodes_by_session(session_id, limit)
            .await
            .map(|nodes| nodes.iter().map(episode_from_node).collect())
            .map_err(|e| Error::tier(TIER, "episodes_by_session", e))
    }

    /// End of the most recently consolidated window for a session.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn last_consolidation_time(
        &self,
        session_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let episodes = self
            .graph
            .episodes_by_session(session_id, 1)
            .await
            .map_err(|e| Error::tier(TIER, "last_consolidation_time", e))?;
        Ok(episodes.first().map(|node| node.time_window_end))
    }

    /// Entities mentioned by an episode.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the lookup fails.
    pub async fn episode_entities(
        &self,
        episode_id: &str,
    ) -> Result<Vec<crate::models::EntityRef>> {
        self.graph
            .episode_entities(episode_id)
            .await
            .map_err(|e| Error::tier(TIER, "episode_entities", e))
    }

    /// Narrow escape hatch: forward a parameterized query to the graph
    /// backend. Safe parameterization is the caller's responsibility.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error from the backend.
    pub async fn query_graph(
        &self,
        query_text: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Value>> {
        self.graph
            .execute_parameterized_query(query_text, params)
            .await
            .map_err(|e| Error::tier(TIER, "query_graph", e))
    }

    /// Idempotent operator reconciliation: find episodes present in one
    /// index but missing from the other, and graph nodes without the
    /// vector-id backref.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when either index scan fails.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let started = Instant::now();
        let result = self.reconcile_inner().await;
        self.metrics.observe("l3_reconcile", started, &result);
        result
    }

    async fn reconcile_inner(&self) -> Result<ReconciliationReport> {
        let graph_ids: std::collections::HashSet<String> = self
            .graph
            .all_episode_ids()
            .await
            .map_err(|e| Error::tier(TIER, "reconcile", e))?
            .into_iter()
            .collect();

        let points = self
            .vector
            .scroll(&self.config.collection, None, usize::MAX)
            .await
            .map_err(|e| Error::tier(TIER, "reconcile", e))?;

        let mut vector_ids = std::collections::HashSet::new();
        let mut missing_in_graph = Vec::new();
        for point in points {
            if let Some(episode_id) = point.payload.get("episode_id").and_then(Value::as_str) {
                vector_ids.insert(episode_id.to_string());
                if !graph_ids.contains(episode_id) {
                    missing_in_graph.push(episode_id.to_string());
                }
            }
        }

        let missing_in_vector = graph_ids
            .iter()
            .filter(|id| !vector_ids.contains(*id))
            .cloned()
            .collect();

        let missing_vector_backref = self
            .graph
            .episodes_missing_vector_id()
            .await
            .map_err(|e| Error::tier(TIER, "reconcile", e))?;

        let report = ReconciliationReport {
            missing_in_graph,
            missing_in_vector,
            missing_vector_backref,
        };
        if !report.is_consistent() {
            warn!(
                "L3 index drift: {} vector-only, {} graph-only, {} missing backrefs",
                report.missing_in_graph.len(),
                report.missing_in_vector.len(),
                report.missing_vector_backref.len()
            );
        }
        Ok(report)
    }

    /// Delete an episode from both indexes. Returns false when unknown.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when a delete fails.
    pub async fn delete(&self, episode_id: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.delete_inner(episode_id).await;
        self.metrics.observe("l3_delete", started, &result);
        result
    }

    async fn delete_inner(&self, episode_id: &str) -> Result<bool> {
        let node = self
            .graph
            .get_episode_node(episode_id)
            .await
            .map_err(|e| Error::tier(TIER, "delete", e))?;

        let Some(node) = node else {
            return Ok(false);
        };

        if let Some(vector_id) = &node.vector_id {
            self.vector
                .delete_points(&self.config.collection, &[vector_id.clone()])
                .await
                .map_err(|e| Error::tier(TIER, "delete", e))?;
        }

        self.graph
            .delete_episode(episode_id)
            .await
            .map_err(|e| Error::tier(TIER, "delete", e))
    }

    /// Delete every episode of a session from both indexes; returns the
    /// number of episodes removed.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when a delete fails.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let episodes = self
            .graph
            .episodes_by_session(session_id, usize::MAX)
            .await
            .map_err(|e| Error::tier(TIER, "delete_session", e))?;

        let mut removed = 0;
        for node in episodes {
            if self.delete(&node.episode_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of episodes for a session (graph index).
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the count fails.
    pub async fn count_by_session(&self, session_id: &str) -> Result<u64> {
        Ok(self
            .graph
            .episodes_by_session(session_id, usize::MAX)
            .await
            .map_err(|e| Error::tier(TIER, "count", e))?
            .len() as u64)
    }

    pub async fn health_check(&self) -> TierHealth {
        TierHealth::from_adapters(
            TIER,
            vec![
                self.vector.health_check().await,
                self.graph.health_check().await,
            ],
        )
    }
}

/// Rebuild an [`Episode`] from its graph node projection. Fields the graph
/// does not carry (source fact ids, entities, topics) come back empty.
fn episode_from_node(node: &GraphEpisode) -> Episode {
    Episode {
        episode_id: node.episode_id.clone(),
        session_id: node.session_id.clone(),
        summary: node.summary.clone(),
        narrative: (!node.narrative.is_empty()).then(|| node.narrative.clone()),
        source_fact_ids: Vec::new(),
        fact_count: node.fact_count,
        time_window_start: node.time_window_start,
        time_window_end: node.time_window_end,
        duration_seconds: node.duration_seconds,
        fact_valid_from: node.fact_valid_from,
        fact_valid_to: node.fact_valid_to,
        source_observation_timestamp: node.source_observation_timestamp,
        embedding_model: None,
        vector_id: node.vector_id.clone(),
        graph_node_id: Some(node.episode_id.clone()),
        entities: Vec::new(),
        topics: Vec::new(),
        importance_score: node.importance_score,
        consolidated_at: node.consolidated_at,
        consolidation_method: node.consolidation_method.clone(),
        metadata: serde_json::Map::new(),
    }
}
