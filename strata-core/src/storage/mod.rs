//! # Storage Abstraction
//!
//! One narrow capability trait per backend kind (KV-list, relational-table,
//! vector-store, graph-store, full-text-store). Adapters implement the
//! capabilities they can offer; tiers receive them by capability
//! (`Arc<dyn KvListStore>` etc.), never by concrete adapter.
//!
//! Every operation fails with one of the five error families
//! (`Connection`, `Timeout`, `Query`, `Data`, `NotFound`); adapters must not
//! swallow backend errors.

pub mod filter;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{EntityRef, Fact, MentionEdge, Turn, TurnQuery};

/// Health report for a single adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AdapterHealth {
    #[must_use]
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            details: None,
            error: None,
        }
    }

    #[must_use]
    pub fn unhealthy(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            details: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// KV list capability (L1 hot path + lease locks)
// ============================================================================

/// List-oriented KV store with TTL support.
///
/// L1 keeps the turn window at `{session:<id>}:turns`; the hash-tag braces
/// colocate session keys on one shard of a clustered store so multi-key
/// pipelines stay atomic.
#[async_trait]
pub trait KvListStore: Send + Sync {
    /// Adapter name for health reports and logs.
    fn name(&self) -> &'static str;

    /// Push to the head of the list, trim to `[0, keep-1]`, and refresh the
    /// key TTL. The three operations commit or fail as a unit.
    async fn list_push_trim_expire(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Push to the head of the list; returns the new length.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;

    /// Trim the list to the inclusive range `[start, stop]` (negative
    /// indexes count from the tail).
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Read the inclusive range `[start, stop]`, head first.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Set the key TTL; returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL, or None when the key has no expiry or does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Keys matching a glob-style pattern (`*` wildcard).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn delete_key(&self, key: &str) -> Result<bool>;

    async fn key_exists(&self, key: &str) -> Result<bool>;

    // ---- scalar ops backing the lease lock ----

    /// Set `key = value` with TTL only when absent; true when acquired.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Extend the TTL only when the stored value matches; true on renewal.
    async fn extend_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete only when the stored value matches; true when deleted.
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool>;

    async fn get_value(&self, key: &str) -> Result<Option<String>>;

    async fn health_check(&self) -> AdapterHealth;
}

// ============================================================================
// Relational capability (L1 cold path + L2 facts)
// ============================================================================

/// Relational store holding the `active_context` and `working_memory`
/// tables. Operations are typed per entity; raw SQL stays an inherent
/// extension of concrete adapters.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create tables and indexes (idempotent).
    async fn ensure_schema(&self) -> Result<()>;

    /// Verify the full-text index on `working_memory.content` exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Config`] when absent — a fatal
    /// configuration error detectable at startup.
    async fn verify_fulltext_index(&self) -> Result<()>;

    // ---- turns ----

    async fn insert_turn(&self, turn: &Turn, ttl_expires_at: DateTime<Utc>) -> Result<()>;

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>>;

    /// Query turns ordered by `timestamp DESC`.
    async fn query_turns(&self, query: &TurnQuery) -> Result<Vec<Turn>>;

    /// Delete all turns of a session; returns the number removed.
    async fn delete_turns_by_session(&self, session_id: &str) -> Result<u64>;

    // ---- facts ----

    async fn insert_fact(&self, fact: &Fact) -> Result<()>;

    /// Batch insert; fails on the first fact that cannot be written.
    async fn insert_facts(&self, facts: &[Fact]) -> Result<()>;

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>>;

    /// Replace a stored fact.
    async fn update_fact(&self, fact: &Fact) -> Result<bool>;

    /// Atomically bump access bookkeeping: `access_count += 1`, refresh
    /// `last_accessed`, recompute `recency_boost = 1 + alpha × count`
    /// (capped at `1 + max_boost`) and the composite score. Concurrent
    /// bumps must not lose updates.
    async fn bump_fact_access(
        &self,
        fact_id: &str,
        accessed_at: DateTime<Utc>,
        alpha: f64,
        max_boost: f64,
    ) -> Result<bool>;

    /// Query facts ordered by `ciar_score DESC, last_accessed DESC`.
    async fn query_facts(&self, query: &crate::models::FactQuery) -> Result<Vec<Fact>>;

    /// Full-text search over fact content, most relevant first.
    async fn search_facts_text(&self, session_id: &str, text: &str, limit: usize)
        -> Result<Vec<Fact>>;

    async fn delete_fact(&self, fact_id: &str) -> Result<bool>;

    async fn delete_facts_by_session(&self, session_id: &str) -> Result<u64>;

    /// Sweep facts extracted before `cutoff`; returns the number removed.
    async fn delete_facts_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn count_facts(&self, session_id: Option<&str>) -> Result<u64>;

    async fn health_check(&self) -> AdapterHealth;
}

// ============================================================================
// Vector capability (L3)
// ============================================================================

/// A stored vector point with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub payload: Value,
}

/// Equality filter over payload fields, applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadFilter {
    pub matches: Vec<(String, Value)>,
}

impl PayloadFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn must_match(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.matches.push((field.into(), value.into()));
        self
    }

    /// Whether a payload satisfies every equality clause.
    #[must_use]
    pub fn matches_payload(&self, payload: &Value) -> bool {
        self.matches
            .iter()
            .all(|(field, expected)| payload.get(field) == Some(expected))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Vector index over fixed-dimension embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create the collection when missing (idempotent).
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Insert or replace a point.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Data`] on dimension mismatch.
    async fn upsert_point(&self, collection: &str, point: VectorPoint) -> Result<()>;

    /// Batch upsert; fails on the first mismatched point.
    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()>;

    async fn retrieve_point(&self, collection: &str, id: &str) -> Result<Option<VectorPoint>>;

    /// Nearest neighbours by cosine similarity; the optional payload filter
    /// restricts candidates before scoring.
    async fn search_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Page through points matching the filter, no scoring.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorPoint>>;

    /// Delete points by id; returns the number actually removed.
    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64>;

    async fn count_points(&self, collection: &str, filter: Option<&PayloadFilter>)
        -> Result<u64>;

    async fn health_check(&self) -> AdapterHealth;
}

// ============================================================================
// Graph capability (L3)
// ============================================================================

/// Episode node projection as stored in the graph
/// (`Episode {episodeId, sessionId, …}` per the persisted layout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEpisode {
    pub episode_id: String,
    pub session_id: String,
    pub summary: String,
    pub narrative: String,
    pub fact_count: usize,
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    pub duration_seconds: f64,
    pub fact_valid_from: DateTime<Utc>,
    pub fact_valid_to: Option<DateTime<Utc>>,
    pub source_observation_timestamp: DateTime<Utc>,
    pub importance_score: f64,
    pub vector_id: Option<String>,
    pub consolidated_at: DateTime<Utc>,
    pub consolidation_method: String,
}

impl GraphEpisode {
    /// Project an [`crate::models::Episode`] onto its graph node shape.
    #[must_use]
    pub fn from_episode(episode: &crate::models::Episode) -> Self {
        Self {
            episode_id: episode.episode_id.clone(),
            session_id: episode.session_id.clone(),
            summary: episode.summary.clone(),
            narrative: episode.narrative.clone().unwrap_or_default(),
            fact_count: episode.fact_count,
            time_window_start: episode.time_window_start,
            time_window_end: episode.time_window_end,
            duration_seconds: episode.duration_seconds,
            fact_valid_from: episode.fact_valid_from,
            fact_valid_to: episode.fact_valid_to,
            source_observation_timestamp: episode.source_observation_timestamp,
            importance_score: episode.importance_score,
            vector_id: episode.vector_id.clone(),
            consolidated_at: episode.consolidated_at,
            consolidation_method: episode.consolidation_method.clone(),
        }
    }

    /// Whether `query_time` falls inside the valid-time interval.
    #[must_use]
    pub fn valid_at(&self, query_time: DateTime<Utc>) -> bool {
        self.fact_valid_from <= query_time
            && self.fact_valid_to.is_none_or(|valid_to| valid_to > query_time)
    }
}

/// Graph store holding `Episode` nodes, `Entity` nodes, and `MENTIONS`
/// edges. The operation set is deliberately narrow; raw queries go through
/// the single escape hatch and are the caller's responsibility to
/// parameterize safely.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// MERGE the episode node by `episodeId`, setting all properties.
    /// Returns the node identifier.
    async fn upsert_episode_node(&self, episode: &GraphEpisode) -> Result<String>;

    /// MERGE an entity node and create a MENTIONS edge from the episode,
    /// carrying the bi-temporal triple and confidence.
    async fn upsert_entity_mention(
        &self,
        episode_id: &str,
        entity: &EntityRef,
        edge: &MentionEdge,
    ) -> Result<()>;

    /// Write the vector point id back onto the episode node, closing the
    /// cross-reference between the two indexes.
    async fn set_episode_vector_id(&self, episode_id: &str, vector_id: &str) -> Result<()>;

    async fn get_episode_node(&self, episode_id: &str) -> Result<Option<GraphEpisode>>;

    /// Entities mentioned by an episode.
    async fn episode_entities(&self, episode_id: &str) -> Result<Vec<EntityRef>>;

    /// Episodes of a session ordered by `timeWindowEnd DESC`.
    async fn episodes_by_session(&self, session_id: &str, limit: usize)
        -> Result<Vec<GraphEpisode>>;

    /// Episodes whose valid-time interval contains `query_time`, ordered by
    /// `importanceScore DESC`.
    async fn query_temporal(
        &self,
        query_time: DateTime<Utc>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GraphEpisode>>;

    /// All episode ids, for reconciliation against the vector index.
    async fn all_episode_ids(&self) -> Result<Vec<String>>;

    /// Episodes whose `vectorId` backref is missing (drift after a partial
    /// dual-index write).
    async fn episodes_missing_vector_id(&self) -> Result<Vec<String>>;

    /// Delete the episode node and its MENTIONS edges; returns false when
    /// the node does not exist.
    async fn delete_episode(&self, episode_id: &str) -> Result<bool>;

    /// Escape hatch: forward a parameterized query to the backend.
    ///
    /// # Errors
    ///
    /// Backends without a query language return
    /// [`crate::error::Error::Query`].
    async fn execute_parameterized_query(
        &self,
        query: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Vec<Value>>;

    async fn health_check(&self) -> AdapterHealth;
}

// ============================================================================
// Full-text capability (L4)
// ============================================================================

/// Collection schema for the full-text store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextSchema {
    pub name: String,
    /// Fields searched by text queries
    pub query_fields: Vec<String>,
    /// Facet fields usable in filter expressions
    pub facet_fields: Vec<String>,
    pub default_sort_field: Option<String>,
}

/// A full-text search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextQuery {
    pub q: String,
    pub query_by: Vec<String>,
    /// Filter expression (`field:=value && field:>=n`)
    pub filter_by: Option<String>,
    /// `field:asc` / `field:desc`
    pub sort_by: Option<String>,
    pub limit: usize,
}

/// A full-text search hit with its relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextHit {
    pub document: Value,
    pub score: f32,
}

/// Document store with full-text search and faceted filtering.
#[async_trait]
pub trait FullTextStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create the collection when missing (idempotent).
    async fn ensure_collection(&self, schema: &FullTextSchema) -> Result<()>;

    /// Index a document keyed by its `id` field; returns the id.
    async fn index_document(&self, collection: &str, document: &Value) -> Result<String>;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn search(&self, collection: &str, query: &FullTextQuery) -> Result<Vec<FullTextHit>>;

    /// Merge `patch` into the stored document.
    async fn update_document(&self, collection: &str, id: &str, patch: &Value) -> Result<()>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool>;

    /// Delete all documents matching a filter expression; returns the count.
    async fn delete_by_filter(&self, collection: &str, filter_by: &str) -> Result<u64>;

    async fn count_documents(&self, collection: &str, filter_by: Option<&str>) -> Result<u64>;

    async fn health_check(&self) -> AdapterHealth;
}

/// Cosine similarity between two equal-length vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [1.0f32, 0.0, 0.0];
        let c = [0.0f32, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn payload_filter_matches_equality_clauses() {
        let filter = PayloadFilter::new()
            .must_match("session_id", "s1")
            .must_match("fact_count", 2);
        let payload = serde_json::json!({"session_id": "s1", "fact_count": 2, "extra": true});
        assert!(filter.matches_payload(&payload));

        let wrong = serde_json::json!({"session_id": "s2", "fact_count": 2});
        assert!(!filter.matches_payload(&wrong));
    }
}
