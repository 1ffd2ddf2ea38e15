use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Minimum length of an episode summary.
pub const MIN_SUMMARY_LEN: usize = 10;

/// An entity mentioned by an episode, stored as a graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_id: String,
    pub name: String,
    pub entity_type: String,
    /// Confidence attached to the MENTIONS edge
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

fn default_confidence() -> f64 {
    0.8
}

impl EntityRef {
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            confidence: default_confidence(),
            properties: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Bi-temporal properties carried on a MENTIONS edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEdge {
    pub fact_valid_from: DateTime<Utc>,
    pub fact_valid_to: Option<DateTime<Utc>>,
    pub source_observation_timestamp: DateTime<Utc>,
    pub confidence: f64,
}

/// A consolidated episode in L3 Episodic Memory.
///
/// Episodes are clusters of related L2 facts summarized into a coherent
/// experience, dual-indexed in the vector store and the graph store under a
/// shared episode identifier. Both the valid-time interval
/// `[fact_valid_from, fact_valid_to)` and the transaction-time
/// `source_observation_timestamp` are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub session_id: String,

    // Content
    pub summary: String,
    #[serde(default)]
    pub narrative: Option<String>,

    // Source facts (referenced, never deleted by this tier)
    #[serde(default)]
    pub source_fact_ids: Vec<String>,
    #[serde(default)]
    pub fact_count: usize,

    // Presentation window
    pub time_window_start: DateTime<Utc>,
    pub time_window_end: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: f64,

    // Bi-temporal window
    pub fact_valid_from: DateTime<Utc>,
    #[serde(default)]
    pub fact_valid_to: Option<DateTime<Utc>>,
    pub source_observation_timestamp: DateTime<Utc>,

    // Embeddings and indexing
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Point id in the vector store
    #[serde(default)]
    pub vector_id: Option<String>,
    /// Node id in the graph store
    #[serde(default)]
    pub graph_node_id: Option<String>,

    // Metadata
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub importance_score: f64,

    // Provenance
    pub consolidated_at: DateTime<Utc>,
    pub consolidation_method: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Episode {
    /// Create an episode covering `[window_start, window_end]`.
    ///
    /// `fact_valid_from` defaults to the window start and the observation
    /// timestamp to now, satisfying the bi-temporal invariants for freshly
    /// consolidated content.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        summary: impl Into<String>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            episode_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            summary: summary.into(),
            narrative: None,
            source_fact_ids: Vec::new(),
            fact_count: 0,
            time_window_start: window_start,
            time_window_end: window_end,
            duration_seconds: (window_end - window_start).num_milliseconds() as f64 / 1000.0,
            fact_valid_from: window_start,
            fact_valid_to: None,
            source_observation_timestamp: now,
            embedding_model: None,
            vector_id: None,
            graph_node_id: None,
            entities: Vec::new(),
            topics: Vec::new(),
            importance_score: 0.5,
            consolidated_at: now,
            consolidation_method: "llm_clustering".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_narrative(mut self, narrative: impl Into<String>) -> Self {
        self.narrative = Some(narrative.into());
        self
    }

    #[must_use]
    pub fn with_source_facts(mut self, fact_ids: Vec<String>) -> Self {
        self.fact_count = fact_ids.len();
        self.source_fact_ids = fact_ids;
        self
    }

    #[must_use]
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance_score = importance.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_entities(mut self, entities: Vec<EntityRef>) -> Self {
        self.entities = entities;
        self
    }

    /// Validate the structural and bi-temporal invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] when the summary is too short, when
    /// `fact_valid_from > source_observation_timestamp`, or when
    /// `fact_valid_to` is not strictly after `fact_valid_from`.
    pub fn validate(&self) -> Result<()> {
        if self.summary.len() < MIN_SUMMARY_LEN {
            return Err(Error::Data(format!(
                "episode summary must be at least {MIN_SUMMARY_LEN} characters"
            )));
        }
        if self.fact_valid_from > self.source_observation_timestamp {
            return Err(Error::Data(
                "fact_valid_from must not be after source_observation_timestamp".to_string(),
            ));
        }
        if let Some(valid_to) = self.fact_valid_to {
            if valid_to <= self.fact_valid_from {
                return Err(Error::Data(
                    "fact_valid_to must be after fact_valid_from".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The MENTIONS edge projection for this episode's bi-temporal window.
    #[must_use]
    pub fn mention_edge(&self, confidence: f64) -> MentionEdge {
        MentionEdge {
            fact_valid_from: self.fact_valid_from,
            fact_valid_to: self.fact_valid_to,
            source_observation_timestamp: self.source_observation_timestamp,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Full-fidelity payload stored alongside the vector point.
    ///
    /// The payload is the episode's own JSON representation, so a scroll hit
    /// deserializes straight back into an [`Episode`].
    pub fn vector_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Graph node property projection (camelCase keys per the graph layout).
    #[must_use]
    pub fn graph_properties(&self) -> Value {
        json!({
            "episodeId": self.episode_id,
            "sessionId": self.session_id,
            "summary": self.summary,
            "narrative": self.narrative.clone().unwrap_or_default(),
            "factCount": self.fact_count,
            "timeWindowStart": self.time_window_start.to_rfc3339(),
            "timeWindowEnd": self.time_window_end.to_rfc3339(),
            "durationSeconds": self.duration_seconds,
            "factValidFrom": self.fact_valid_from.to_rfc3339(),
            "factValidTo": self.fact_valid_to.map(|t| t.to_rfc3339()),
            "sourceObservationTimestamp": self.source_observation_timestamp.to_rfc3339(),
            "importanceScore": self.importance_score,
            "vectorId": self.vector_id,
            "consolidatedAt": self.consolidated_at.to_rfc3339(),
            "consolidationMethod": self.consolidation_method,
        })
    }

    /// Whether `query_time` falls inside the valid-time interval.
    #[must_use]
    pub fn valid_at(&self, query_time: DateTime<Utc>) -> bool {
        self.fact_valid_from <= query_time
            && self.fact_valid_to.is_none_or(|valid_to| valid_to > query_time)
    }
}
