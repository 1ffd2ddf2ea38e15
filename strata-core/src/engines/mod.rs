//! # Lifecycle Engines
//!
//! The processes that move data up the cascade: Promotion (L1 → L2),
//! Consolidation (L2 → L3), Distillation (L3 → L4), and the query-time
//! KnowledgeSynthesizer over L4.
//!
//! Per-item failures are counted, not thrown: an engine records
//! `errors += 1` with the last message and keeps going. Engines are
//! re-runnable; partial progress already persisted is never rolled back.

mod consolidation;
mod distillation;
mod extractor;
mod promotion;
mod segmenter;
mod synthesizer;

pub use consolidation::{ConsolidationConfig, ConsolidationEngine, ConsolidationStats};
pub use distillation::{
    DistillationConfig, DistillationEngine, DistillationRequest, DistillationStats,
    KnowledgeTemplate,
};
pub use extractor::{ExtractorConfig, FactExtractor};
pub use promotion::{PromotionConfig, PromotionEngine, PromotionStats};
pub use segmenter::{SegmenterConfig, TopicSegment, TopicSegmenter};
pub use synthesizer::{
    Conflict, KnowledgeSynthesizer, SynthesisResult, SynthesizerConfig,
};

use serde::Serialize;

/// Outcome status shared by every engine cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum CycleStatus {
    Completed,
    Skipped(String),
}

impl CycleStatus {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleStatus::Skipped(_))
    }
}
