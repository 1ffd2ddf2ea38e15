//! Promotion engine (L1 → L2): topic segmentation → fact extraction →
//! CIAR gate → persist.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::ciar::CiarScorer;
use crate::lifecycle::{LifecycleEvent, LifecycleSink};
use crate::models::Turn;
use crate::tiers::{ActiveContextTier, WorkingMemoryTier};

use super::extractor::FactExtractor;
use super::segmenter::{TopicSegment, TopicSegmenter};
use super::CycleStatus;

/// Promotion configuration.
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// CIAR gate for persisting a fact to L2
    pub promotion_threshold: f64,
    /// Sessions with fewer turns are skipped
    pub batch_min_turns: usize,
    /// Run segmentation before extraction
    pub segmentation_enabled: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.6,
            batch_min_turns: 3,
            segmentation_enabled: true,
        }
    }
}

/// Stats record for one promotion cycle.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionStats {
    pub session_id: String,
    #[serde(flatten)]
    pub status: CycleStatus,
    pub turns_retrieved: usize,
    pub facts_extracted: usize,
    pub facts_promoted: usize,
    pub errors: usize,
    pub last_error: Option<String>,
}

impl PromotionStats {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            status: CycleStatus::Completed,
            turns_retrieved: 0,
            facts_extracted: 0,
            facts_promoted: 0,
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

/// Promotes significant facts from Active Context into Working Memory.
pub struct PromotionEngine {
    l1: Arc<ActiveContextTier>,
    l2: Arc<WorkingMemoryTier>,
    segmenter: TopicSegmenter,
    extractor: FactExtractor,
    scorer: CiarScorer,
    lifecycle: Option<Arc<dyn LifecycleSink>>,
    config: PromotionConfig,
}

impl PromotionEngine {
    #[must_use]
    pub fn new(
        l1: Arc<ActiveContextTier>,
        l2: Arc<WorkingMemoryTier>,
        segmenter: TopicSegmenter,
        extractor: FactExtractor,
        scorer: CiarScorer,
        config: PromotionConfig,
    ) -> Self {
        Self {
            l1,
            l2,
            segmenter,
            extractor,
            scorer,
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

    /// Run one promotion cycle for a session. Per-fact failures are
    /// counted, never thrown.
    pub async fn process_session(&self, session_id: &str) -> PromotionStats {
        let mut stats = PromotionStats::new(session_id);
        self.publish("promotion_start", session_id, json!({}));

        // L1 returns newest first; extraction wants chronological order
        let turns = match self.l1.retrieve_session(session_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Promotion could not read L1 for {session_id}: {e}");
                stats.errors += 1;
                stats.last_error = Some(e.to_string());
                return stats;
            }
        };
        stats.turns_retrieved = turns.len();

        if turns.len() < self.config.batch_min_turns {
            debug!(
                "Session {session_id}: {} turns below minimum {}",
                turns.len(),
                self.config.batch_min_turns
            );
            stats.status = CycleStatus::Skipped("below_minimum".to_string());
            return stats;
        }

        let chronological: Vec<Turn> = turns.into_iter().rev().collect();

        let segments = if self.config.segmentation_enabled {
            self.segmenter.segment_turns(&chronological).await
        } else {
            Vec::new()
        };

        let source_uri = format!("l1:{session_id}");
        if segments.is_empty() {
            let text = format_conversation(&chronological);
            self.promote_text(&text, session_id, &source_uri, None, &mut stats)
                .await;
        } else {
            for segment in &segments {
                let text = segment_text(&chronological, segment);
                self.promote_text(&text, session_id, &source_uri, Some(segment), &mut stats)
                    .await;
            }
        }

        info!(
            "Promotion cycle for {session_id}: {} turns, {} extracted, {} promoted, {} errors",
            stats.turns_retrieved, stats.facts_extracted, stats.facts_promoted, stats.errors
        );
        self.publish(
            "promotion_end",
            session_id,
            json!({
                "facts_extracted": stats.facts_extracted,
                "facts_promoted": stats.facts_promoted,
                "errors": stats.errors,
            }),
        );
        stats
    }

    async fn promote_text(
        &self,
        text: &str,
        session_id: &str,
        source_uri: &str,
        segment: Option<&TopicSegment>,
        stats: &mut PromotionStats,
    ) {
        let facts = self
            .extractor
            .extract(text, session_id, Some(source_uri), segment)
            .await;
        stats.facts_extracted += facts.len();

        for mut fact in facts {
            let components = self.scorer.calculate_components(&fact);
            fact.age_decay = components.age_decay;
            fact.recency_boost = components.recency_boost;
            fact.ciar_score = components.final_score;

            if components.final_score < self.config.promotion_threshold {
                debug!(
                    "Fact below promotion threshold ({:.3} < {}): {}",
                    components.final_score, self.config.promotion_threshold, fact.content
                );
                continue;
            }

            match self.l2.store(&fact).await {
                Ok(_) => stats.facts_promoted += 1,
                Err(e) => {
                    warn!("Failed to persist promoted fact: {e}");
                    stats.errors += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }
    }
}

fn format_conversation(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn segment_text(turns: &[Turn], segment: &TopicSegment) -> String {
    if segment.turn_indices.is_empty() {
        return format_conversation(turns);
    }
    segment
        .turn_indices
        .iter()
        .filter_map(|&i| turns.get(i))
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}
