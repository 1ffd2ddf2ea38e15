//! L1 Active Context: the working-memory buffer of recent turns.
//!
//! Write-through pattern: every turn lands in the KV hot cache (windowed
//! list with TTL, committed as one pipeline) and, when backup is enabled,
//! in the durable relational table tagged `tier=L1`. Reads prefer the hot
//! path and rebuild it from the cold path on a miss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, TierKind};
use crate::metrics::MetricsCollector;
use crate::models::{Turn, TurnQuery};
use crate::storage::{KvListStore, RelationalStore};
use crate::tiers::TierHealth;

const TIER: TierKind = TierKind::L1ActiveContext;

/// L1 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveContextConfig {
    /// Max turns kept per session
    pub window_size: usize,
    /// Session key TTL
    pub ttl_hours: u64,
    /// Mirror writes into the relational backup table
    pub backup_enabled: bool,
    /// Extend the session TTL on every successful read
    pub refresh_ttl_on_read: bool,
}

impl Default for ActiveContextConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            ttl_hours: 24,
            backup_enabled: true,
            refresh_ttl_on_read: false,
        }
    }
}

impl ActiveContextConfig {
    fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

/// L1: Active Context tier.
pub struct ActiveContextTier {
    kv: Arc<dyn KvListStore>,
    relational: Arc<dyn RelationalStore>,
    metrics: Arc<MetricsCollector>,
    config: ActiveContextConfig,
}

/// KV key for a session's turn window. The hash-tag braces colocate all
/// session keys on one shard of a clustered store, keeping the
/// push/trim/expire pipeline atomic.
#[must_use]
pub fn session_key(session_id: &str) -> String {
    format!("{{session:{session_id}}}:turns")
}

impl ActiveContextTier {
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvListStore>,
        relational: Arc<dyn RelationalStore>,
        metrics: Arc<MetricsCollector>,
        config: ActiveContextConfig,
    ) -> Self {
        info!(
            "L1 ActiveContextTier initialized: window_size={}, ttl_hours={}, backup={}",
            config.window_size, config.ttl_hours, config.backup_enabled
        );
        Self {
            kv,
            relational,
            metrics,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ActiveContextConfig {
        &self.config
    }

    /// Store a conversational turn.
    ///
    /// The KV push, trim, and TTL refresh commit as a unit; the relational
    /// backup insert follows when enabled.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when either write path fails.
    pub async fn store(&self, turn: &Turn) -> Result<String> {
        let started = Instant::now();
        let result = self.store_inner(turn).await;
        self.metrics.observe("l1_store", started, &result);
        result
    }

    async fn store_inner(&self, turn: &Turn) -> Result<String> {
        if turn.content.is_empty() {
            return Err(Error::tier(
                TIER,
                "store",
                Error::Data("turn content must not be empty".to_string()),
            ));
        }

        let key = session_key(&turn.session_id);
        let serialized =
            serde_json::to_string(turn).map_err(|e| Error::tier(TIER, "store", e.into()))?;

        self.kv
            .list_push_trim_expire(&key, &serialized, self.config.window_size, self.config.ttl())
            .await
            .map_err(|e| Error::tier(TIER, "store", e))?;
        debug!("Stored turn {} in hot window {key}", turn.turn_id);

        if self.config.backup_enabled {
            let ttl_expires_at = Utc::now() + chrono::Duration::hours(self.config.ttl_hours as i64);
            self.relational
                .insert_turn(turn, ttl_expires_at)
                .await
                .map_err(|e| Error::tier(TIER, "store", e))?;
            debug!("Stored turn {} in relational backup", turn.turn_id);
        }

        Ok(turn.turn_id.clone())
    }

    /// Retrieve the recent turn window for a session, newest first.
    ///
    /// Tries the KV hot path; falls back to the relational table and
    /// rebuilds the hot window on a cold hit. Rebuild failure is logged but
    /// does not fail the read.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when both paths fail.
    pub async fn retrieve_session(&self, session_id: &str) -> Result<Vec<Turn>> {
        let started = Instant::now();
        let result = self.retrieve_session_inner(session_id).await;
        self.metrics.observe("l1_retrieve_session", started, &result);
        result
    }

    async fn retrieve_session_inner(&self, session_id: &str) -> Result<Vec<Turn>> {
        let key = session_key(session_id);

        match self.kv.list_range(&key, 0, -1).await {
            Ok(raw_turns) if !raw_turns.is_empty() => {
                let mut turns = Vec::with_capacity(raw_turns.len());
                for raw in &raw_turns {
                    let mut turn: Turn = serde_json::from_str(raw)
                        .map_err(|e| Error::tier(TIER, "retrieve_session", e.into()))?;
                    if turn.session_id.is_empty() {
                        turn.session_id = session_id.to_string();
                    }
                    turns.push(turn);
                }
                debug!("Retrieved {} turns from hot path for {session_id}", turns.len());

                if self.config.refresh_ttl_on_read {
                    if let Err(e) = self.kv.expire(&key, self.config.ttl()).await {
                        warn!("TTL refresh on read failed for {key}: {e}");
                    }
                }
                return Ok(turns);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Hot-path retrieval failed for {key}: {e}, falling back to relational");
            }
        }

        if !self.config.backup_enabled {
            return Ok(Vec::new());
        }

        let query = TurnQuery::for_session(session_id).with_limit(self.config.window_size);
        let turns = self
            .relational
            .query_turns(&query)
            .await
            .map_err(|e| Error::tier(TIER, "retrieve_session", e))?;

        if turns.is_empty() {
            debug!("Session {session_id} not found in L1");
            return Ok(Vec::new());
        }
        info!("Retrieved {} turns from cold path for {session_id}", turns.len());

        // Rebuild the hot window: oldest pushed first so the head stays newest
        if let Err(e) = self.rebuild_hot_window(&key, &turns).await {
            warn!("Failed to rebuild hot window for {session_id}: {e}");
        }

        Ok(turns)
    }

    async fn rebuild_hot_window(&self, key: &str, turns: &[Turn]) -> Result<()> {
        for turn in turns.iter().rev() {
            let serialized = serde_json::to_string(turn)?;
            self.kv.list_push(key, &serialized).await?;
        }
        self.kv
            .list_trim(key, 0, self.config.window_size as i64 - 1)
            .await?;
        self.kv.expire(key, self.config.ttl()).await?;
        debug!("Rebuilt hot window {key} with {} turns", turns.len());
        Ok(())
    }

    /// Retrieve a single turn by id through the relational backup.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn retrieve_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        if !self.config.backup_enabled {
            return Ok(None);
        }
        let started = Instant::now();
        let result = self
            .relational
            .get_turn(turn_id)
            .await
            .map_err(|e| Error::tier(TIER, "retrieve_turn", e));
        self.metrics.observe("l1_retrieve_turn", started, &result);
        result
    }

    /// Administrative query over the relational backup.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the query fails.
    pub async fn query(&self, query: &TurnQuery) -> Result<Vec<Turn>> {
        let started = Instant::now();
        let result = self
            .relational
            .query_turns(query)
            .await
            .map_err(|e| Error::tier(TIER, "query", e));
        self.metrics.observe("l1_query", started, &result);
        result
    }

    /// Number of turns currently in the hot window.
    pub async fn window_count(&self, session_id: &str) -> usize {
        self.kv
            .list_len(&session_key(session_id))
            .await
            .unwrap_or(0)
    }

    /// Delete a session from both paths. Returns true when either held data.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the relational delete fails; a KV
    /// delete failure is logged and tolerated.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.delete_session_inner(session_id).await;
        self.metrics.observe("l1_delete", started, &result);
        result
    }

    async fn delete_session_inner(&self, session_id: &str) -> Result<bool> {
        let mut deleted = false;

        match self.kv.delete_key(&session_key(session_id)).await {
            Ok(true) => deleted = true,
            Ok(false) => {}
            Err(e) => warn!("Hot-path delete failed for {session_id}: {e}"),
        }

        if self.config.backup_enabled {
            let removed = self
                .relational
                .delete_turns_by_session(session_id)
                .await
                .map_err(|e| Error::tier(TIER, "delete", e))?;
            deleted |= removed > 0;
        }

        if deleted {
            debug!("Deleted session {session_id} from L1");
        }
        Ok(deleted)
    }

    /// Session ids currently present in the hot cache.
    ///
    /// # Errors
    ///
    /// Returns a tier-wrapped error when the scan fails.
    pub async fn active_sessions(&self) -> Result<Vec<String>> {
        let keys = self
            .kv
            .scan_keys("{session:*}:turns")
            .await
            .map_err(|e| Error::tier(TIER, "active_sessions", e))?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix("{session:")
                    .and_then(|rest| rest.strip_suffix("}:turns"))
                    .map(ToString::to_string)
            })
            .collect())
    }

    pub async fn health_check(&self) -> TierHealth {
        let adapters = if self.config.backup_enabled {
            vec![
                self.kv.health_check().await,
                self.relational.health_check().await,
            ]
        } else {
            vec![self.kv.health_check().await]
        };
        TierHealth::from_adapters(TIER, adapters)
    }
}
