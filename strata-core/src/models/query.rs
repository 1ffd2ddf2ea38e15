use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fact::{FactCategory, FactType};
use super::knowledge::KnowledgeType;
use super::turn::Role;

/// Default result limit for tier queries.
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Query parameters for L1 turns (administrative path over the relational
/// backend; hot retrieval goes through the KV window instead).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnQuery {
    pub session_id: Option<String>,
    pub role: Option<Role>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TurnQuery {
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Query parameters for L2 facts.
///
/// The tier's CIAR floor applies unless `include_low_ciar` is set; results
/// are ordered `ciar_score DESC, last_accessed DESC`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactQuery {
    pub session_id: Option<String>,
    pub min_ciar: Option<f64>,
    pub fact_types: Vec<FactType>,
    pub fact_categories: Vec<FactCategory>,
    pub extracted_after: Option<DateTime<Utc>>,
    pub extracted_before: Option<DateTime<Utc>>,
    pub include_low_ciar: bool,
    pub limit: usize,
}

impl Default for FactQuery {
    fn default() -> Self {
        Self {
            session_id: None,
            min_ciar: None,
            fact_types: Vec::new(),
            fact_categories: Vec::new(),
            extracted_after: None,
            extracted_before: None,
            include_low_ciar: false,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl FactQuery {
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_min_ciar(mut self, min_ciar: f64) -> Self {
        self.min_ciar = Some(min_ciar);
        self
    }

    #[must_use]
    pub fn with_types(mut self, fact_types: Vec<FactType>) -> Self {
        self.fact_types = fact_types;
        self
    }

    #[must_use]
    pub fn with_time_range(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.extracted_after = Some(after);
        self.extracted_before = Some(before);
        self
    }

    #[must_use]
    pub fn include_low_ciar(mut self) -> Self {
        self.include_low_ciar = true;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Query parameters for L3 episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeQuery {
    pub session_id: Option<String>,
    pub min_importance: f64,
    pub topics: Vec<String>,
    pub time_range_start: Option<DateTime<Utc>>,
    pub time_range_end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for EpisodeQuery {
    fn default() -> Self {
        Self {
            session_id: None,
            min_importance: 0.0,
            topics: Vec::new(),
            time_range_start: None,
            time_range_end: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl EpisodeQuery {
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Query parameters for L4 knowledge documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    pub search_text: Option<String>,
    pub knowledge_type: Option<KnowledgeType>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub min_confidence: Option<f64>,
    pub limit: usize,
}

impl Default for KnowledgeQuery {
    fn default() -> Self {
        Self {
            search_text: None,
            knowledge_type: None,
            category: None,
            tags: Vec::new(),
            min_confidence: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl KnowledgeQuery {
    #[must_use]
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            search_text: Some(query.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_type(mut self, knowledge_type: KnowledgeType) -> Self {
        self.knowledge_type = Some(knowledge_type);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}
