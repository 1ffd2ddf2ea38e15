//! L2 Working Memory: facts that passed the significance gate.
//!
//! Every write enforces `ciar_score ≥ threshold`; every retrieve bumps the
//! access bookkeeping best-effort through an atomic increment so concurrent
//! reads never lose counts.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, TierKind};
use crate::metrics::MetricsCollector;
use crate::models::{Fact, FactQuery, FactType, MAX_FACT_CONTENT_LEN};
use crate::storage::RelationalStore;
use crate::tiers::TierHealth;

const TIER: TierKind = TierKind::L2WorkingMemory;

/// L2 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryConfig {
    /// Minimum CIAR score accepted on write and floored on default queries
    pub ciar_threshold: f64,
    /// Facts older than this are swept by `cleanup_expired`
    pub ttl_days: i64,
    /// Per-access recency increment
    pub recency_alpha: f64,
    /// Cap on the recency boost term
    pub max_recency_boost: f64,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            ciar_threshold: 0.6,
            ttl_days: 7,
            recency_alpha: 0.05,
            max_recency_boost: 0.3,
        }
    }
}

/// L2: Working Memory tier.
pub struct WorkingMemoryTier {
    relational: Arc<dyn RelationalStore>,
    metrics: Arc<MetricsCollector>,
    config: WorkingMemoryConfig,
}

impl WorkingMemoryTier {
    #[must_use]
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        metrics: Arc<MetricsCollector>,
        config: WorkingMemoryConfig,
    ) -> Self {
        info!(
            "L2 WorkingMemoryTier initialized: ciar_threshold={}, ttl_days={}",
            config.ciar_threshold, config.ttl_days
        );
        Self {
            relational,
            metrics,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkingMemoryConfig {
        &self.config
    }

    /// Store a fact that passed the significance gate.
    ///
    /// The stored score is normalized to the component product when it
    /// drifted beyond the tolerance.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped [`Error::Data`] for empty/oversized content
    /// or a score below the threshold.
    pub async fn store(&self, fact: &Fact) -> Result<String> {
        let started = Instant::now();
        let result = self.store_inner(fact).await;
        self.metrics.observe("l2_store", started, &result);
        result
    }

    async fn store_inner(&self, fact: &Fact) -> Result<String> {
        if fact.content.is_empty() || fact.content.len() > MAX_FACT_CONTENT_LEN {
            return Err(Error::tier(
                TIER,
                "store",
                Error::Data(format!(
                    "fact content length must be in 1..={MAX_FACT_CONTENT_LEN}"
                )),
            ));
        }

        let mut fact = fact.clone();
        if fact.normalize_score() {
            debug!(
                "Normalized drifted CIAR score for fact {} to {:.4}",
                fact.fact_id, fact.ciar_score
            );
        }

        if fact.ciar_score < self.config.ciar_threshold {
            warn!(
                "Rejecting fact {}: score {:.4} below threshold {}",
                fact.fact_id, fact.ciar_score, self.config.ciar_threshold
            );
            return Err(Error::tier(
                TIER,
                "store",
                Error::Data(format!(
                    "fact CIAR score {:.4} below threshold {}",
                    fact.ciar_score, self.config.ciar_threshold
                )),
            ));
        }

        self.relational
            .insert_fact(&fact)
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;
        debug!("Stored fact {} (score {:.4})", fact.fact_id, fact.ciar_score);
        Ok(fact.fact_id)
    }

    /// Retrieve a fact by id, returning the record as read.
    ///
    /// Access bookkeeping (atomic count increment, recency boost, score
    /// recompute) runs after the read and is best-effort: an update failure
    /// is logged and the read still returns the data.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the read itself fails.
    pub async fn retrieve(&self, fact_id: &str) -> Result<Option<Fact>> {
        let started = Instant::now();
        let result = self.retrieve_inner(fact_id).await;
        self.metrics.observe("l2_retrieve", started, &result);
        result
    }

    async fn retrieve_inner(&self, fact_id: &str) -> Result<Option<Fact>> {
        let fact = self
            .relational
            .get_fact(fact_id)
            .await
            .map_err(|e| Error::tier(TIER, "retrieve", e))?;

        if fact.is_some() {
            if let Err(e) = self
                .relational
                .bump_fact_access(
                    fact_id,
                    Utc::now(),
                    self.config.recency_alpha,
                    self.config.max_recency_boost,
                )
                .await
            {
                warn!("Access-tracking update failed for fact {fact_id}: {e}");
            }
        }

        Ok(fact)
    }

    /// Query facts. The tier CIAR floor applies unless the query sets
    /// `include_low_ciar` or its own floor.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn query(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        let started = Instant::now();
        let mut effective = query.clone();
        if effective.min_ciar.is_none() && !effective.include_low_ciar {
            effective.min_ciar = Some(self.config.ciar_threshold);
        }
        let result = self
            .relational
            .query_facts(&effective)
            .await
            .map_err(|e| Error::tier(TIER, "query", e));
        self.metrics.observe("l2_query", started, &result);
        result
    }

    /// Facts for a session ordered by `ciar_score DESC, last_accessed DESC`.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn query_by_session(
        &self,
        session_id: &str,
        min_ciar: Option<f64>,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let mut query = FactQuery::for_session(session_id).with_limit(limit);
        query.min_ciar = Some(min_ciar.unwrap_or(self.config.ciar_threshold));
        self.query(&query).await
    }

    /// Facts of one type for a session.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn query_by_type(
        &self,
        session_id: &str,
        fact_type: FactType,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let query = FactQuery::for_session(session_id)
            .with_types(vec![fact_type])
            .with_limit(limit);
        self.query(&query).await
    }

    /// Full-text search over fact content for a session.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the search fails.
    pub async fn search_text(
        &self,
        session_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let started = Instant::now();
        let result = self
            .relational
            .search_facts_text(session_id, text, limit)
            .await
            .map_err(|e| Error::tier(TIER, "search_text", e));
        self.metrics.observe("l2_search_text", started, &result);
        result
    }

    /// Overwrite certainty/impact and recompute the composite score.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] (tier-wrapped) for an unknown fact.
    pub async fn update_ciar_score(
        &self,
        fact_id: &str,
        certainty: f64,
        impact: f64,
    ) -> Result<Fact> {
        let started = Instant::now();
        let result = self.update_ciar_score_inner(fact_id, certainty, impact).await;
        self.metrics.observe("l2_update_ciar", started, &result);
        result
    }

    async fn update_ciar_score_inner(
        &self,
        fact_id: &str,
        certainty: f64,
        impact: f64,
    ) -> Result<Fact> {
        let mut fact = self
            .relational
            .get_fact(fact_id)
            .await
            .map_err(|e| Error::tier(TIER, "update_ciar", e))?
            .ok_or_else(|| {
                Error::tier(TIER, "update_ciar", Error::NotFound(format!("fact {fact_id}")))
            })?;

        fact.certainty = certainty.clamp(0.0, 1.0);
        fact.impact = impact.clamp(0.0, 1.0);
        fact.recompute_score();

        self.relational
            .update_fact(&fact)
            .await
            .map_err(|e| Error::tier(TIER, "update_ciar", e))?;
        Ok(fact)
    }

    /// Delete a fact. Returns false when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the delete fails.
    pub async fn delete(&self, fact_id: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self
            .relational
            .delete_fact(fact_id)
            .await
            .map_err(|e| Error::tier(TIER, "delete", e));
        self.metrics.observe("l2_delete", started, &result);
        result
    }

    /// Delete all facts of a session; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the delete fails.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64> {
        let started = Instant::now();
        let result = self
            .relational
            .delete_facts_by_session(session_id)
            .await
            .map_err(|e| Error::tier(TIER, "delete_session", e));
        self.metrics.observe("l2_delete_session", started, &result);
        result
    }

    /// Sweep facts older than `ttl_days`; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the sweep fails.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.ttl_days);
        let started = Instant::now();
        let result = self
            .relational
            .delete_facts_older_than(cutoff)
            .await
            .map_err(|e| Error::tier(TIER, "cleanup_expired", e));
        self.metrics.observe("l2_cleanup", started, &result);
        if let Ok(removed) = &result {
            info!("Swept {removed} expired facts from L2");
        }
        result
    }

    /// Number of facts stored, optionally scoped to a session.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the count fails.
    pub async fn count(&self, session_id: Option<&str>) -> Result<u64> {
        self.relational
            .count_facts(session_id)
            .await
            .map_err(|e| Error::tier(TIER, "count", e))
    }

    pub async fn health_check(&self) -> TierHealth {
        TierHealth::from_adapters(TIER, vec![self.relational.health_check().await])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryRelationalStore;

    fn tier() -> WorkingMemoryTier {
        WorkingMemoryTier::new(
            Arc::new(InMemoryRelationalStore::new()),
            Arc::new(MetricsCollector::default()),
            WorkingMemoryConfig::default(),
        )
    }

    fn fact_with_score(score_components: (f64, f64)) -> Fact {
        Fact::new("s1", "Customer ships through Rotterdam")
            .with_components(score_components.0, score_components.1)
    }

    #[tokio::test]
    async fn significance_gate_rejects_low_scores() {
        let tier = tier();

        let low = fact_with_score((0.5, 0.8)); // 0.4
        let err = tier.store(&low).await.unwrap_err();
        assert_eq!(err.family(), "data");
        assert_eq!(tier.count(Some("s1")).await.unwrap(), 0);

        let high = fact_with_score((1.0, 0.75)); // 0.75
        tier.store(&high).await.unwrap();
        assert_eq!(tier.count(Some("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retrieve_returns_read_state_then_bumps() {
        let tier = tier();
        let fact = fact_with_score((1.0, 0.75));
        let fact_id = tier.store(&fact).await.unwrap();

        // First retrieve sees the stored state
        let first = tier.retrieve(&fact_id).await.unwrap().unwrap();
        assert_eq!(first.access_count, 0);

        // Second retrieve sees the bump applied by the first
        let second = tier.retrieve(&fact_id).await.unwrap().unwrap();
        assert_eq!(second.access_count, 1);
        assert!((second.recency_boost - 1.05).abs() < 1e-9);
        assert!(second.recency_boost > first.recency_boost);
        assert!(
            (second.ciar_score - second.expected_score()).abs() <= 0.01,
            "score must track components after the bump"
        );
    }

    #[tokio::test]
    async fn default_query_applies_tier_floor() {
        let tier = tier();
        tier.store(&fact_with_score((1.0, 0.9))).await.unwrap();
        tier.store(&fact_with_score((1.0, 0.65))).await.unwrap();

        let defaults = tier.query(&FactQuery::for_session("s1")).await.unwrap();
        assert!(defaults.iter().all(|f| f.ciar_score >= 0.6));
        assert!(defaults.windows(2).all(|w| w[0].ciar_score >= w[1].ciar_score));

        let floored = tier
            .query_by_session("s1", Some(0.8), 10)
            .await
            .unwrap();
        assert_eq!(floored.len(), 1);
    }

    #[tokio::test]
    async fn drifted_score_is_normalized_on_store() {
        let tier = tier();
        let mut fact = fact_with_score((1.0, 0.9));
        fact.ciar_score = 0.3; // drifted well below the component product

        let fact_id = tier.store(&fact).await.unwrap();
        let stored = tier.retrieve(&fact_id).await.unwrap().unwrap();
        assert!((stored.ciar_score - 0.9).abs() <= 0.01);
    }

    #[tokio::test]
    async fn update_ciar_score_recomputes_product() {
        let tier = tier();
        let fact_id = tier.store(&fact_with_score((1.0, 0.75))).await.unwrap();

        let updated = tier.update_ciar_score(&fact_id, 0.8, 0.9).await.unwrap();
        assert!((updated.ciar_score - 0.72).abs() <= 0.01);

        assert!(tier.update_ciar_score("missing", 0.5, 0.5).await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_fact_returns_false_without_error() {
        let tier = tier();
        assert!(!tier.delete("missing").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let tier = tier();
        let oversized = Fact::new("s1", "x".repeat(MAX_FACT_CONTENT_LEN + 1))
            .with_components(1.0, 0.9);
        assert!(tier.store(&oversized).await.is_err());
    }
}
