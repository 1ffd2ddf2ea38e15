use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Knowledge document templates produced by distillation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeType {
    Summary,
    Insight,
    Pattern,
    Recommendation,
    Rule,
}

impl KnowledgeType {
    /// All template types, in distillation order.
    pub const ALL: [KnowledgeType; 5] = [
        KnowledgeType::Summary,
        KnowledgeType::Insight,
        KnowledgeType::Pattern,
        KnowledgeType::Recommendation,
        KnowledgeType::Rule,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeType::Summary => "summary",
            KnowledgeType::Insight => "insight",
            KnowledgeType::Pattern => "pattern",
            KnowledgeType::Recommendation => "recommendation",
            KnowledgeType::Rule => "rule",
        }
    }
}

impl fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "summary" => Ok(KnowledgeType::Summary),
            "insight" => Ok(KnowledgeType::Insight),
            "pattern" => Ok(KnowledgeType::Pattern),
            "recommendation" => Ok(KnowledgeType::Recommendation),
            "rule" => Ok(KnowledgeType::Rule),
            other => Err(Error::Data(format!("unknown knowledge type: {other}"))),
        }
    }
}

/// Distilled knowledge in L4 Semantic Memory.
///
/// Documents are immutable in identity; only the usage-tracking fields
/// (`usefulness_score`, `access_count`, `validation_count`, `last_accessed`)
/// are mutated through the update path. Provenance back to source episodes
/// is mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub knowledge_id: String,

    // Content
    pub title: String,
    pub content: String,
    pub knowledge_type: KnowledgeType,

    // Confidence and provenance
    pub confidence_score: f64,
    pub source_episode_ids: Vec<String>,
    #[serde(default)]
    pub episode_count: usize,
    #[serde(default)]
    pub provenance_links: Vec<String>,

    // Classification
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    /// Session scope, when distilled from a single session
    #[serde(default)]
    pub session_id: Option<String>,

    // Lifecycle
    pub distilled_at: DateTime<Utc>,
    #[serde(default)]
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub validation_count: u64,

    // Usage tracking
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
    pub usefulness_score: f64,

    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl KnowledgeDocument {
    /// Create a document with provenance over `source_episode_ids`.
    #[must_use]
    pub fn new(
        knowledge_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        knowledge_type: KnowledgeType,
        source_episode_ids: Vec<String>,
    ) -> Self {
        Self {
            knowledge_id: knowledge_id.into(),
            title: title.into(),
            content: content.into(),
            knowledge_type,
            confidence_score: 0.7,
            episode_count: source_episode_ids.len(),
            source_episode_ids,
            provenance_links: Vec::new(),
            category: None,
            tags: Vec::new(),
            domain: None,
            session_id: None,
            distilled_at: Utc::now(),
            last_validated: None,
            validation_count: 0,
            access_count: 0,
            last_accessed: None,
            usefulness_score: 0.5,
            metadata: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate provenance and score bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] when `source_episode_ids` is empty or
    /// `usefulness_score` leaves [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.source_episode_ids.is_empty() {
            return Err(Error::Data(
                "knowledge document requires at least one source episode".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.usefulness_score) {
            return Err(Error::Data(format!(
                "usefulness_score {} outside [0, 1]",
                self.usefulness_score
            )));
        }
        Ok(())
    }

    /// Flat document projection for the full-text store.
    #[must_use]
    pub fn fulltext_document(&self) -> Value {
        json!({
            "id": self.knowledge_id,
            "title": self.title,
            "content": self.content,
            "knowledge_type": self.knowledge_type.as_str(),
            "confidence_score": self.confidence_score,
            "source_episode_ids": self.source_episode_ids,
            "episode_count": self.episode_count,
            "provenance_links": self.provenance_links,
            "category": self.category.clone().unwrap_or_default(),
            "tags": self.tags,
            "domain": self.domain.clone().unwrap_or_default(),
            "session_id": self.session_id.clone().unwrap_or_default(),
            "distilled_at": self.distilled_at.timestamp(),
            "last_validated": self.last_validated.map(|t| t.timestamp()),
            "validation_count": self.validation_count,
            "access_count": self.access_count,
            "last_accessed": self.last_accessed.map(|t| t.timestamp()),
            "usefulness_score": self.usefulness_score,
            "metadata": Value::Object(self.metadata.clone()),
        })
    }

    /// Rebuild a document from its full-text projection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Data`] for malformed documents.
    pub fn from_fulltext_document(doc: &Value) -> Result<Self> {
        let str_field = |key: &str| -> Result<String> {
            doc.get(key)
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| Error::Data(format!("document missing field: {key}")))
        };
        let string_list = |key: &str| -> Vec<String> {
            doc.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let opt_string = |key: &str| -> Option<String> {
            doc.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };
        let timestamp = |key: &str| -> Option<DateTime<Utc>> {
            doc.get(key)
                .and_then(Value::as_i64)
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        };

        let knowledge_type: KnowledgeType = str_field("knowledge_type")?.parse()?;
        let source_episode_ids = string_list("source_episode_ids");

        Ok(Self {
            knowledge_id: str_field("id")?,
            title: str_field("title")?,
            content: str_field("content")?,
            knowledge_type,
            confidence_score: doc
                .get("confidence_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.7),
            episode_count: doc
                .get("episode_count")
                .and_then(Value::as_u64)
                .unwrap_or(source_episode_ids.len() as u64) as usize,
            source_episode_ids,
            provenance_links: string_list("provenance_links"),
            category: opt_string("category"),
            tags: string_list("tags"),
            domain: opt_string("domain"),
            session_id: opt_string("session_id"),
            distilled_at: timestamp("distilled_at").unwrap_or_else(Utc::now),
            last_validated: timestamp("last_validated"),
            validation_count: doc
                .get("validation_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            access_count: doc.get("access_count").and_then(Value::as_u64).unwrap_or(0),
            last_accessed: timestamp("last_accessed"),
            usefulness_score: doc
                .get("usefulness_score")
                .and_then(Value::as_f64)
                .unwrap_or(0.5),
            metadata: doc
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KnowledgeDocument {
        KnowledgeDocument::new(
            "know_1",
            "Carrier preference",
            "Customer prefers ocean freight for non-urgent lanes.",
            KnowledgeType::Recommendation,
            vec!["ep1".to_string(), "ep2".to_string()],
        )
        .with_tags(vec!["freight".to_string()])
        .with_domain("logistics")
    }

    #[test]
    fn validate_requires_provenance() {
        let mut doc = sample();
        doc.validate().unwrap();
        doc.source_episode_ids.clear();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_bounds_usefulness() {
        let mut doc = sample();
        doc.usefulness_score = 1.2;
        assert!(doc.validate().is_err());
    }

    #[test]
    fn fulltext_projection_round_trips() {
        let mut doc = sample();
        doc.access_count = 3;
        doc.metadata
            .insert("location_code".to_string(), json!("NLRTM"));

        let projected = doc.fulltext_document();
        let back = KnowledgeDocument::from_fulltext_document(&projected).unwrap();
        assert_eq!(back.knowledge_id, doc.knowledge_id);
        assert_eq!(back.knowledge_type, KnowledgeType::Recommendation);
        assert_eq!(back.access_count, 3);
        assert_eq!(back.metadata["location_code"], json!("NLRTM"));
        assert_eq!(back.source_episode_ids, doc.source_episode_ids);
    }
}
