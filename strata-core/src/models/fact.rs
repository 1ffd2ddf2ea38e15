use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Maximum length of a fact statement.
pub const MAX_FACT_CONTENT_LEN: usize = 5000;

/// Tolerance for the stored-vs-recomputed CIAR score invariant.
pub const CIAR_SCORE_TOLERANCE: f64 = 0.01;

/// Per-access recency increment applied by [`Fact::mark_accessed`].
pub const ACCESS_RECENCY_ALPHA: f64 = 0.05;

/// Cap on the recency boost term (total multiplier caps at 1.3).
pub const ACCESS_RECENCY_MAX_BOOST: f64 = 0.3;

/// Classification of fact types.
///
/// The impact weight table in the CIAR scorer keys off this classification;
/// `Instruction` facts additionally receive standing-order precedence in the
/// assembled context block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    Preference,
    Constraint,
    Entity,
    Mention,
    Relationship,
    Event,
    Instruction,
}

impl FactType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Preference => "preference",
            FactType::Constraint => "constraint",
            FactType::Entity => "entity",
            FactType::Mention => "mention",
            FactType::Relationship => "relationship",
            FactType::Event => "event",
            FactType::Instruction => "instruction",
        }
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(FactType::Preference),
            "constraint" => Ok(FactType::Constraint),
            "entity" => Ok(FactType::Entity),
            "mention" => Ok(FactType::Mention),
            "relationship" => Ok(FactType::Relationship),
            "event" => Ok(FactType::Event),
            "instruction" => Ok(FactType::Instruction),
            other => Err(Error::Data(format!("unknown fact type: {other}"))),
        }
    }
}

/// Domain-specific fact categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Personal,
    Business,
    Technical,
    Operational,
}

impl FactCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Personal => "personal",
            FactCategory::Business => "business",
            FactCategory::Technical => "technical",
            FactCategory::Operational => "operational",
        }
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(FactCategory::Personal),
            "business" => Ok(FactCategory::Business),
            "technical" => Ok(FactCategory::Technical),
            "operational" => Ok(FactCategory::Operational),
            other => Err(Error::Data(format!("unknown fact category: {other}"))),
        }
    }
}

/// A significant fact held in L2 Working Memory.
///
/// The composite significance score obeys
/// `ciar_score = (certainty × impact) × age_decay × recency_boost` within
/// [`CIAR_SCORE_TOLERANCE`]; construction and access tracking both keep the
/// stored score consistent with the components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    pub session_id: String,
    pub content: String,

    // CIAR components
    pub ciar_score: f64,
    pub certainty: f64,
    pub impact: f64,
    pub age_decay: f64,
    pub recency_boost: f64,

    // Provenance
    #[serde(default)]
    pub source_uri: Option<String>,
    pub source_type: String,
    #[serde(default)]
    pub topic_segment_id: Option<String>,
    #[serde(default)]
    pub topic_label: Option<String>,

    // Classification
    #[serde(default)]
    pub fact_type: Option<FactType>,
    #[serde(default)]
    pub fact_category: Option<FactCategory>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    // Access bookkeeping
    pub extracted_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl Fact {
    /// Create a fact with neutral components and a normalized score.
    #[must_use]
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut fact = Self {
            fact_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            content: content.into(),
            ciar_score: 0.0,
            certainty: 0.7,
            impact: 0.5,
            age_decay: 1.0,
            recency_boost: 1.0,
            source_uri: None,
            source_type: "extracted".to_string(),
            topic_segment_id: None,
            topic_label: None,
            fact_type: None,
            fact_category: None,
            metadata: serde_json::Map::new(),
            extracted_at: now,
            last_accessed: now,
            access_count: 0,
        };
        fact.recompute_score();
        fact
    }

    #[must_use]
    pub fn with_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = Some(fact_type);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: FactCategory) -> Self {
        self.fact_category = Some(category);
        self
    }

    /// Set certainty and impact, recomputing the composite score.
    #[must_use]
    pub fn with_components(mut self, certainty: f64, impact: f64) -> Self {
        self.certainty = certainty.clamp(0.0, 1.0);
        self.impact = impact.clamp(0.0, 1.0);
        self.recompute_score();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source_uri: Option<String>, source_type: impl Into<String>) -> Self {
        self.source_uri = source_uri;
        self.source_type = source_type.into();
        self
    }

    #[must_use]
    pub fn with_topic(mut self, segment_id: impl Into<String>, label: impl Into<String>) -> Self {
        self.topic_segment_id = Some(segment_id.into());
        self.topic_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_extracted_at(mut self, extracted_at: DateTime<Utc>) -> Self {
        self.extracted_at = extracted_at;
        self
    }

    /// The score implied by the current components.
    #[must_use]
    pub fn expected_score(&self) -> f64 {
        (self.certainty * self.impact) * self.age_decay * self.recency_boost
    }

    /// Recompute `ciar_score` from the components, rounded to 4 decimals.
    pub fn recompute_score(&mut self) {
        self.ciar_score = round4(self.expected_score());
    }

    /// Normalize a stored score that drifted more than the tolerance from
    /// the component product. Returns true when a correction was applied.
    pub fn normalize_score(&mut self) -> bool {
        if (self.ciar_score - self.expected_score()).abs() > CIAR_SCORE_TOLERANCE {
            self.recompute_score();
            true
        } else {
            false
        }
    }

    /// Update access tracking: bump the counter, refresh `last_accessed`,
    /// and recompute recency boost and the composite score.
    pub fn mark_accessed(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
        self.recency_boost = (1.0 + ACCESS_RECENCY_ALPHA * self.access_count as f64)
            .min(1.0 + ACCESS_RECENCY_MAX_BOOST);
        self.recompute_score();
    }

    /// Whether this fact is a standing order for the agent.
    #[must_use]
    pub fn is_instruction(&self) -> bool {
        self.fact_type == Some(FactType::Instruction)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_matches_component_product() {
        let fact = Fact::new("s1", "User prefers morning meetings").with_components(0.9, 0.9);
        assert!((fact.ciar_score - 0.81).abs() <= CIAR_SCORE_TOLERANCE);
    }

    #[test]
    fn normalize_corrects_drifted_score() {
        let mut fact = Fact::new("s1", "x").with_components(0.8, 0.5);
        fact.ciar_score = 0.99;
        assert!(fact.normalize_score());
        assert!((fact.ciar_score - 0.4).abs() <= CIAR_SCORE_TOLERANCE);

        // Within tolerance: left alone
        let before = fact.ciar_score;
        fact.ciar_score = before + 0.005;
        assert!(!fact.normalize_score());
    }

    #[test]
    fn mark_accessed_increments_and_boosts() {
        let mut fact = Fact::new("s1", "x").with_components(1.0, 0.75);
        assert_eq!(fact.access_count, 0);
        assert!((fact.recency_boost - 1.0).abs() < f64::EPSILON);

        fact.mark_accessed();
        assert_eq!(fact.access_count, 1);
        assert!((fact.recency_boost - 1.05).abs() < 1e-9);
        assert!((fact.ciar_score - 0.75 * 1.05).abs() <= CIAR_SCORE_TOLERANCE);
    }

    #[test]
    fn fact_type_parses_instruction() {
        assert_eq!("instruction".parse::<FactType>().unwrap(), FactType::Instruction);
        assert!("bogus".parse::<FactType>().is_err());
    }
}
