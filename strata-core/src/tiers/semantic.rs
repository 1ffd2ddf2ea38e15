//! L4 Semantic Memory: durable knowledge documents with full-text search,
//! faceted filtering, and provenance back to source episodes.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, TierKind};
use crate::metrics::MetricsCollector;
use crate::models::{KnowledgeDocument, KnowledgeQuery};
use crate::storage::filter::{eq_clause, gte_clause, in_clause, join_clauses};
use crate::storage::{FullTextQuery, FullTextSchema, FullTextStore};
use crate::tiers::TierHealth;

const TIER: TierKind = TierKind::L4SemanticMemory;

/// L4 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    pub collection: String,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            collection: "knowledge_base".to_string(),
        }
    }
}

/// A search hit carrying the decoded document and its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeHit {
    pub document: KnowledgeDocument,
    pub search_score: f32,
}

/// L4: Semantic Memory tier.
pub struct SemanticMemoryTier {
    fulltext: Arc<dyn FullTextStore>,
    metrics: Arc<MetricsCollector>,
    config: SemanticConfig,
}

impl SemanticMemoryTier {
    #[must_use]
    pub fn new(
        fulltext: Arc<dyn FullTextStore>,
        metrics: Arc<MetricsCollector>,
        config: SemanticConfig,
    ) -> Self {
        info!("L4 SemanticMemoryTier initialized: collection={}", config.collection);
        Self {
            fulltext,
            metrics,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    fn schema(&self) -> FullTextSchema {
        FullTextSchema {
            name: self.config.collection.clone(),
            query_fields: vec!["title".to_string(), "content".to_string()],
            facet_fields: vec![
                "knowledge_type".to_string(),
                "category".to_string(),
                "tags".to_string(),
                "domain".to_string(),
                "confidence_score".to_string(),
                "usefulness_score".to_string(),
                "access_count".to_string(),
                "distilled_at".to_string(),
            ],
            default_sort_field: Some("usefulness_score".to_string()),
        }
    }

    /// Idempotently create the collection.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when creation fails.
    pub async fn initialize(&self) -> Result<()> {
        self.fulltext
            .ensure_collection(&self.schema())
            .await
            .map_err(|e| Error::tier(TIER, "initialize", e))
    }

    /// Store a knowledge document.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped [`Error::Data`] for missing provenance or
    /// out-of-range scores.
    pub async fn store(&self, document: &KnowledgeDocument) -> Result<String> {
        let started = Instant::now();
        let result = self.store_inner(document).await;
        self.metrics.observe("l4_store", started, &result);
        result
    }

    async fn store_inner(&self, document: &KnowledgeDocument) -> Result<String> {
        document
            .validate()
            .map_err(|e| Error::tier(TIER, "store", e))?;

        let id = self
            .fulltext
            .index_document(&self.config.collection, &document.fulltext_document())
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;
        debug!(
            "Stored knowledge document {id} ({}, {} source episodes)",
            document.knowledge_type,
            document.source_episode_ids.len()
        );
        Ok(id)
    }

    /// Retrieve a document by id, returning it as read.
    ///
    /// Access bookkeeping (count, `last_accessed`) is updated and the
    /// document re-indexed best-effort; an update failure never fails the
    /// read.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the read fails.
    pub async fn retrieve(&self, knowledge_id: &str) -> Result<Option<KnowledgeDocument>> {
        let started = Instant::now();
        let result = self.retrieve_inner(knowledge_id).await;
        self.metrics.observe("l4_retrieve", started, &result);
        result
    }

    async fn retrieve_inner(&self, knowledge_id: &str) -> Result<Option<KnowledgeDocument>> {
        let Some(raw) = self
            .fulltext
            .get_document(&self.config.collection, knowledge_id)
            .await
            .map_err(|e| Error::tier(TIER, "retrieve", e))?
        else {
            return Ok(None);
        };

        let document = KnowledgeDocument::from_fulltext_document(&raw)
            .map_err(|e| Error::tier(TIER, "retrieve", e))?;

        let patch = json!({
            "access_count": document.access_count + 1,
            "last_accessed": Utc::now().timestamp(),
        });
        if let Err(e) = self
            .fulltext
            .update_document(&self.config.collection, knowledge_id, &patch)
            .await
        {
            warn!("Access-tracking update failed for document {knowledge_id}: {e}");
        }

        Ok(Some(document))
    }

    /// Build the facet filter expression for a query, honoring a raw
    /// override when provided.
    #[must_use]
    pub fn build_filter(query: &KnowledgeQuery, raw_filter: Option<&str>) -> Option<String> {
        if let Some(raw) = raw_filter {
            return Some(raw.to_string());
        }
        let mut clauses = Vec::new();
        if let Some(knowledge_type) = query.knowledge_type {
            clauses.push(eq_clause("knowledge_type", knowledge_type.as_str()));
        }
        if let Some(category) = &query.category {
            clauses.push(eq_clause("category", category));
        }
        if !query.tags.is_empty() {
            clauses.push(in_clause("tags", &query.tags));
        }
        if let Some(min_confidence) = query.min_confidence {
            clauses.push(gte_clause("confidence_score", min_confidence));
        }
        (!clauses.is_empty()).then(|| join_clauses(&clauses))
    }

    /// Search documents. Text queries run over `title, content`; the
    /// default sort is `usefulness_score DESC`.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the search fails.
    pub async fn search(
        &self,
        query: &KnowledgeQuery,
        raw_filter: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>> {
        let started = Instant::now();
        let result = self.search_inner(query, raw_filter).await;
        self.metrics.observe("l4_search", started, &result);
        result
    }

    async fn search_inner(
        &self,
        query: &KnowledgeQuery,
        raw_filter: Option<&str>,
    ) -> Result<Vec<KnowledgeHit>> {
        let fulltext_query = FullTextQuery {
            q: query.search_text.clone().unwrap_or_else(|| "*".to_string()),
            query_by: vec!["title".to_string(), "content".to_string()],
            filter_by: Self::build_filter(query, raw_filter),
            sort_by: Some("usefulness_score:desc".to_string()),
            limit: query.limit,
        };

        let hits = self
            .fulltext
            .search(&self.config.collection, &fulltext_query)
            .await
            .map_err(|e| Error::tier(TIER, "search", e))?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                KnowledgeDocument::from_fulltext_document(&hit.document)
                    .ok()
                    .map(|document| KnowledgeHit {
                        document,
                        search_score: hit.score,
                    })
            })
            .collect())
    }

    /// Update the usefulness score (clamped to [0, 1]).
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the update fails.
    pub async fn update_usefulness(&self, knowledge_id: &str, usefulness: f64) -> Result<bool> {
        let patch = json!({"usefulness_score": usefulness.clamp(0.0, 1.0)});
        match self
            .fulltext
            .update_document(&self.config.collection, knowledge_id, &patch)
            .await
        {
            Ok(()) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(Error::tier(TIER, "update_usefulness", e)),
        }
    }

    /// Record a validation event on a document.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the update fails.
    pub async fn record_validation(&self, knowledge_id: &str) -> Result<bool> {
        let Some(raw) = self
            .fulltext
            .get_document(&self.config.collection, knowledge_id)
            .await
            .map_err(|e| Error::tier(TIER, "record_validation", e))?
        else {
            return Ok(false);
        };
        let current = raw
            .get("validation_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let patch = json!({
            "validation_count": current + 1,
            "last_validated": Utc::now().timestamp(),
        });
        self.fulltext
            .update_document(&self.config.collection, knowledge_id, &patch)
            .await
            .map_err(|e| Error::tier(TIER, "record_validation", e))?;
        Ok(true)
    }

    /// Delete a document. Returns false when unknown.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the delete fails.
    pub async fn delete(&self, knowledge_id: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self
            .fulltext
            .delete_document(&self.config.collection, knowledge_id)
            .await
            .map_err(|e| Error::tier(TIER, "delete", e));
        self.metrics.observe("l4_delete", started, &result);
        result
    }

    /// Delete all documents distilled from one session's episodes.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the delete fails.
    pub async fn delete_by_session(&self, session_id: &str) -> Result<u64> {
        self.fulltext
            .delete_by_filter(&self.config.collection, &eq_clause("session_id", session_id))
            .await
            .map_err(|e| Error::tier(TIER, "delete_by_session", e))
    }

    /// Number of documents, optionally restricted by a filter expression.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the count fails.
    pub async fn count(&self, filter_by: Option<&str>) -> Result<u64> {
        self.fulltext
            .count_documents(&self.config.collection, filter_by)
            .await
            .map_err(|e| Error::tier(TIER, "count", e))
    }

    pub async fn health_check(&self) -> TierHealth {
        TierHealth::from_adapters(TIER, vec![self.fulltext.health_check().await])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KnowledgeType;
    use crate::storage::memory::InMemoryFullTextStore;

    async fn tier() -> SemanticMemoryTier {
        let tier = SemanticMemoryTier::new(
            Arc::new(InMemoryFullTextStore::new()),
            Arc::new(MetricsCollector::default()),
            SemanticConfig::default(),
        );
        tier.initialize().await.unwrap();
        tier
    }

    fn document(id: &str, knowledge_type: KnowledgeType, usefulness: f64) -> KnowledgeDocument {
        let mut doc = KnowledgeDocument::new(
            id,
            format!("Document {id}"),
            "Ocean freight is preferred for non-urgent lanes to cut cost.",
            knowledge_type,
            vec!["ep-1".to_string()],
        );
        doc.usefulness_score = usefulness;
        doc
    }

    #[tokio::test]
    async fn store_requires_provenance() {
        let tier = tier().await;
        let mut orphan = document("k1", KnowledgeType::Insight, 0.5);
        orphan.source_episode_ids.clear();
        assert!(tier.store(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn retrieve_bumps_access_best_effort() {
        let tier = tier().await;
        tier.store(&document("k1", KnowledgeType::Insight, 0.5))
            .await
            .unwrap();

        let first = tier.retrieve("k1").await.unwrap().unwrap();
        assert_eq!(first.access_count, 0);

        let second = tier.retrieve("k1").await.unwrap().unwrap();
        assert_eq!(second.access_count, 1);
        assert!(second.last_accessed.is_some());
    }

    #[tokio::test]
    async fn search_filters_by_facets_and_sorts_by_usefulness() {
        let tier = tier().await;
        tier.store(&document("k1", KnowledgeType::Recommendation, 0.9))
            .await
            .unwrap();
        tier.store(&document("k2", KnowledgeType::Recommendation, 0.4))
            .await
            .unwrap();
        tier.store(&document("k3", KnowledgeType::Rule, 0.99))
            .await
            .unwrap();

        let query = KnowledgeQuery::default().with_type(KnowledgeType::Recommendation);
        let hits = tier.search(&query, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.knowledge_id, "k1");
        assert!(hits[0].document.usefulness_score >= hits[1].document.usefulness_score);
    }

    #[tokio::test]
    async fn raw_filter_overrides_facets() {
        let tier = tier().await;
        tier.store(&document("k1", KnowledgeType::Rule, 0.8))
            .await
            .unwrap();

        let query = KnowledgeQuery::default().with_type(KnowledgeType::Insight);
        let hits = tier
            .search(&query, Some("knowledge_type:='rule'"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn usefulness_updates_are_clamped() {
        let tier = tier().await;
        tier.store(&document("k1", KnowledgeType::Pattern, 0.5))
            .await
            .unwrap();

        assert!(tier.update_usefulness("k1", 7.5).await.unwrap());
        let doc = tier.retrieve("k1").await.unwrap().unwrap();
        assert!((doc.usefulness_score - 1.0).abs() < f64::EPSILON);

        assert!(!tier.update_usefulness("missing", 0.5).await.unwrap());
    }

    #[tokio::test]
    async fn session_scoped_delete() {
        let tier = tier().await;
        let mut scoped = document("k1", KnowledgeType::Summary, 0.5);
        scoped.session_id = Some("s1".to_string());
        tier.store(&scoped).await.unwrap();
        tier.store(&document("k2", KnowledgeType::Summary, 0.5))
            .await
            .unwrap();

        assert_eq!(tier.delete_by_session("s1").await.unwrap(), 1);
        assert_eq!(tier.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn validation_counter_increments() {
        let tier = tier().await;
        tier.store(&document("k1", KnowledgeType::Rule, 0.5))
            .await
            .unwrap();

        assert!(tier.record_validation("k1").await.unwrap());
        assert!(tier.record_validation("k1").await.unwrap());
        let doc = tier.retrieve("k1").await.unwrap().unwrap();
        assert_eq!(doc.validation_count, 2);
        assert!(!tier.record_validation("missing").await.unwrap());
    }
}
