//! # CIAR Scoring
//!
//! Significance scoring that gates promotion from L1 to L2:
//! `CIAR = (Certainty × Impact) × Age_Decay × Recency_Boost`.
//!
//! - certainty: confidence in the fact's accuracy (0.0–1.0)
//! - impact: importance by fact type (0.0–1.0)
//! - age decay: `exp(-λ × age_days)`, floored
//! - recency boost: `1 + factor × ln(1 + access_count)`, capped

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Fact, FactType};

/// Configuration for the CIAR scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiarConfig {
    /// Promotion threshold applied by `exceeds_threshold`
    pub threshold: f64,
    /// Age decay rate per day
    pub age_decay_lambda: f64,
    /// Age cap in days before decay stops increasing
    pub max_age_days: f64,
    /// Floor for the age decay factor
    pub min_age_score: f64,
    /// Logarithmic recency boost factor
    pub recency_boost_factor: f64,
    /// Cap on the boost term (total multiplier caps at `1 + max_boost`)
    pub max_recency_boost: f64,
    /// Certainty assigned when no pattern rule matches
    pub default_certainty: f64,
}

impl Default for CiarConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            age_decay_lambda: 0.1,
            max_age_days: 365.0,
            min_age_score: 0.1,
            recency_boost_factor: 0.05,
            max_recency_boost: 0.3,
            default_certainty: 0.7,
        }
    }
}

/// All CIAR components plus the intermediate products, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CiarComponents {
    pub certainty: f64,
    pub impact: f64,
    pub age_decay: f64,
    pub recency_boost: f64,
    /// certainty × impact
    pub base_score: f64,
    /// age_decay × recency_boost
    pub temporal_score: f64,
    pub final_score: f64,
}

/// Calculates CIAR scores to determine promotion eligibility.
#[derive(Debug, Clone, Default)]
pub struct CiarScorer {
    config: CiarConfig,
}

impl CiarScorer {
    #[must_use]
    pub fn new(config: CiarConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CiarConfig {
        &self.config
    }

    /// Calculate the composite CIAR score for a fact.
    #[must_use]
    pub fn calculate(&self, fact: &Fact) -> f64 {
        self.calculate_components(fact).final_score
    }

    /// Calculate all components separately for debugging and analysis.
    #[must_use]
    pub fn calculate_components(&self, fact: &Fact) -> CiarComponents {
        let certainty = fact.certainty.clamp(0.0, 1.0);
        let impact = self.impact(fact);
        let age_decay = self.age_decay_at(Some(fact.extracted_at), Utc::now());
        let recency_boost = self.recency_boost(fact.access_count);

        let base_score = certainty * impact;
        let temporal_score = age_decay * recency_boost;
        CiarComponents {
            certainty,
            impact,
            age_decay,
            recency_boost,
            base_score,
            temporal_score,
            final_score: base_score * temporal_score,
        }
    }

    /// Check if a fact's score meets the promotion threshold.
    #[must_use]
    pub fn exceeds_threshold(&self, fact: &Fact) -> bool {
        self.calculate(fact) >= self.config.threshold
    }

    /// Infer certainty from content when no explicit value was reported.
    ///
    /// Pattern rules: explicit statements ("I prefer", "always") score 1.0,
    /// hedged habits ("usually", "often") 0.8, observations 0.6,
    /// speculation ("might", "maybe") 0.4.
    #[must_use]
    pub fn infer_certainty(&self, content: &str) -> f64 {
        let content = content.to_lowercase();
        const EXPLICIT: [&str; 5] = ["i prefer", "i want", "i need", "always", "never"];
        const IMPLIED: [&str; 4] = ["usually", "often", "typically", "generally"];
        const SPECULATION: [&str; 4] = ["might", "maybe", "possibly", "could"];
        const OBSERVATION: [&str; 3] = ["observed", "noticed", "seen"];

        if EXPLICIT.iter().any(|phrase| content.contains(phrase)) {
            1.0
        } else if IMPLIED.iter().any(|phrase| content.contains(phrase)) {
            0.8
        } else if SPECULATION.iter().any(|phrase| content.contains(phrase)) {
            0.4
        } else if OBSERVATION.iter().any(|phrase| content.contains(phrase)) {
            0.6
        } else {
            self.config.default_certainty
        }
    }

    /// Impact weight for a fact type. Higher weight means more worth
    /// remembering long-term.
    #[must_use]
    pub fn impact_weight(fact_type: Option<FactType>) -> f64 {
        match fact_type {
            Some(FactType::Instruction) => 0.95,
            Some(FactType::Preference) => 0.9,
            Some(FactType::Constraint) => 0.8,
            Some(FactType::Relationship) => 0.7,
            Some(FactType::Entity) => 0.6,
            Some(FactType::Event) => 0.6,
            Some(FactType::Mention) => 0.3,
            None => 0.5,
        }
    }

    fn impact(&self, fact: &Fact) -> f64 {
        let mut impact = if fact.impact > 0.0 {
            fact.impact.clamp(0.0, 1.0)
        } else {
            Self::impact_weight(fact.fact_type)
        };

        // Heavily accessed facts are evidently important
        if fact.access_count > 10 {
            impact = (impact * 1.1).min(1.0);
        }
        if fact
            .metadata
            .get("is_important")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            impact = (impact * 1.2).min(1.0);
        }

        impact
    }

    /// Age decay factor at `now` for a fact extracted at `extracted_at`.
    /// A missing timestamp yields 1.0.
    #[must_use]
    pub fn age_decay_at(&self, extracted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(extracted_at) = extracted_at else {
            return 1.0;
        };

        let age_days = (now - extracted_at).num_seconds().max(0) as f64 / 86_400.0;
        let age_days = age_days.min(self.config.max_age_days);
        let decay = (-self.config.age_decay_lambda * age_days).exp();
        decay.max(self.config.min_age_score)
    }

    /// Logarithmic recency boost: `1 + min(factor × ln(1 + n), max_boost)`.
    #[must_use]
    pub fn recency_boost(&self, access_count: u64) -> f64 {
        if access_count == 0 {
            return 1.0;
        }
        let boost = self.config.recency_boost_factor * (1.0 + access_count as f64).ln();
        1.0 + boost.min(self.config.max_recency_boost)
    }
}
