//! Fact extraction: LLM-first with a rule-based regex fallback.
//!
//! The LLM path asks for typed facts as JSON and skips invalid entries;
//! any call or parse failure drops to the rules (email addresses become
//! entity facts, first-person preference statements become preference
//! facts).

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::ciar::CiarScorer;
use crate::llm::{strip_code_fences, GenerateOptions, LlmClient};
use crate::models::{Fact, FactCategory, FactType};

use super::segmenter::TopicSegment;

const SYSTEM_PROMPT: &str = "You are an expert fact extractor for a conversational memory \
system. Extract significant facts from the input. Return a JSON object with a key 'facts' \
containing a list of facts. Each fact must have: 'content', 'type', 'category', 'certainty' \
(0.0-1.0), 'impact' (0.0-1.0). Valid types: preference, constraint, entity, mention, \
relationship, event, instruction. Valid categories: personal, business, technical, \
operational.";

/// Extractor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFact {
    content: Option<String>,
    #[serde(rename = "type")]
    fact_type: Option<String>,
    category: Option<String>,
    certainty: Option<f64>,
    impact: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    facts: Vec<RawFact>,
}

/// Extracts structured facts from raw conversation text.
pub struct FactExtractor {
    llm: Arc<LlmClient>,
    scorer: CiarScorer,
    config: ExtractorConfig,
    email_pattern: Regex,
    preference_pattern: Regex,
}

impl FactExtractor {
    /// # Panics
    ///
    /// Never panics in practice; the embedded patterns are valid.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn new(llm: Arc<LlmClient>, scorer: CiarScorer, config: ExtractorConfig) -> Self {
        #[allow(clippy::unwrap_used)]
        let email_pattern =
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
        #[allow(clippy::unwrap_used)]
        let preference_pattern =
            Regex::new(r"(?i)\b(I (?:like|love|prefer|always use)[^.!?;\n]*)").unwrap();
        Self {
            llm,
            scorer,
            config,
            email_pattern,
            preference_pattern,
        }
    }

    /// Extract facts from text. LLM failures fall back to rule-based
    /// extraction; this never errors.
    pub async fn extract(
        &self,
        text: &str,
        session_id: &str,
        source_uri: Option<&str>,
        segment: Option<&TopicSegment>,
    ) -> Vec<Fact> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        match self.extract_with_llm(text, session_id, source_uri, segment).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!("LLM extraction failed: {e}. Falling back to rules.");
                self.extract_with_rules(text, session_id, source_uri, segment)
            }
        }
    }

    async fn extract_with_llm(
        &self,
        text: &str,
        session_id: &str,
        source_uri: Option<&str>,
        segment: Option<&TopicSegment>,
    ) -> crate::error::Result<Vec<Fact>> {
        let prompt = format!("{SYSTEM_PROMPT}\n\nInput: {text}\nOutput JSON:");
        let schema = json!({
            "type": "object",
            "properties": {
                "facts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "type": {"type": "string"},
                            "category": {"type": "string"},
                            "certainty": {"type": "number"},
                            "impact": {"type": "number"}
                        },
                        "required": ["content", "type"]
                    }
                }
            },
            "required": ["facts"]
        });

        let mut options = GenerateOptions::default()
            .with_temperature(0.0)
            .with_max_output_tokens(1024)
            .with_schema(schema);
        options.model.clone_from(&self.config.model);

        let response = self.llm.generate(&prompt, &options).await?;
        let reply: ExtractionReply = serde_json::from_str(strip_code_fences(&response.text))?;

        let mut facts = Vec::new();
        for raw in reply.facts {
            let Some(content) = raw.content.filter(|c| !c.is_empty()) else {
                warn!("Skipping LLM fact without content");
                continue;
            };
            let fact_type = raw
                .fact_type
                .as_deref()
                .and_then(|t| t.parse::<FactType>().ok());
            if fact_type.is_none() {
                warn!("Skipping LLM fact with invalid type: {:?}", raw.fact_type);
                continue;
            }
            let category = raw
                .category
                .as_deref()
                .and_then(|c| c.parse::<FactCategory>().ok())
                .unwrap_or(FactCategory::Operational);

            // Reuse LLM-reported certainty/impact; infer what is missing
            let certainty = raw
                .certainty
                .unwrap_or_else(|| self.scorer.infer_certainty(&content));
            let impact = raw
                .impact
                .unwrap_or_else(|| CiarScorer::impact_weight(fact_type));

            let mut fact = Fact::new(session_id, content)
                .with_components(certainty, impact)
                .with_source(source_uri.map(ToString::to_string), "llm_extraction");
            fact.fact_type = fact_type;
            fact.fact_category = Some(category);
            if let Some(segment) = segment {
                fact = fact.with_topic(segment.segment_id.clone(), segment.topic.clone());
            }
            facts.push(fact);
        }

        debug!("LLM extracted {} facts", facts.len());
        Ok(facts)
    }

    /// Rule-based fallback extraction.
    #[must_use]
    pub fn extract_with_rules(
        &self,
        text: &str,
        session_id: &str,
        source_uri: Option<&str>,
        segment: Option<&TopicSegment>,
    ) -> Vec<Fact> {
        let mut facts = Vec::new();

        for email in self.email_pattern.find_iter(text) {
            let mut fact = Fact::new(session_id, format!("Email address: {}", email.as_str()))
                .with_components(1.0, 0.5)
                .with_source(source_uri.map(ToString::to_string), "rule_fallback")
                .with_type(FactType::Entity)
                .with_category(FactCategory::Personal);
            if let Some(segment) = segment {
                fact = fact.with_topic(segment.segment_id.clone(), segment.topic.clone());
            }
            facts.push(fact);
        }

        for preference in self.preference_pattern.find_iter(text) {
            let mut fact = Fact::new(session_id, preference.as_str().trim())
                .with_components(0.8, 0.7)
                .with_source(source_uri.map(ToString::to_string), "rule_fallback")
                .with_type(FactType::Preference)
                .with_category(FactCategory::Personal);
            if let Some(segment) = segment {
                fact = fact.with_topic(segment.segment_id.clone(), segment.topic.clone());
            }
            facts.push(fact);
        }

        debug!("Rule fallback extracted {} facts", facts.len());
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::QueueProvider;

    fn extractor_with(provider: QueueProvider) -> FactExtractor {
        let client = LlmClient::new();
        client.register_provider(Arc::new(provider), None);
        FactExtractor::new(
            Arc::new(client),
            CiarScorer::default(),
            ExtractorConfig::default(),
        )
    }

    #[tokio::test]
    async fn parses_typed_llm_facts() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text(
            r#"{"facts": [
                {"content": "Customer prefers rail", "type": "preference", "category": "business", "certainty": 0.9, "impact": 0.85},
                {"content": "Weekly volume is 40 TEU", "type": "constraint", "category": "operational"}
            ]}"#,
        );
        let extractor = extractor_with(provider);

        let facts = extractor.extract("...", "s1", Some("l1:s1"), None).await;
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].fact_type, Some(FactType::Preference));
        assert!((facts[0].certainty - 0.9).abs() < f64::EPSILON);
        assert_eq!(facts[0].source_type, "llm_extraction");
        // Missing impact falls back to the type weight table
        assert!((facts[1].impact - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalid_entries_are_skipped() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text(
            r#"{"facts": [
                {"content": "ok fact", "type": "mention"},
                {"type": "mention"},
                {"content": "bad type", "type": "wibble"}
            ]}"#,
        );
        let extractor = extractor_with(provider);

        let facts = extractor.extract("...", "s1", None, None).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "ok fact");
    }

    #[tokio::test]
    async fn llm_failure_uses_rules() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_error("down");
        let extractor = extractor_with(provider);

        let facts = extractor
            .extract(
                "Reach me at ops@example.com. I prefer morning calls.",
                "s1",
                None,
                None,
            )
            .await;
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].fact_type, Some(FactType::Entity));
        assert!(facts[0].content.contains("ops@example.com"));
        assert_eq!(facts[1].fact_type, Some(FactType::Preference));
        assert_eq!(facts[1].source_type, "rule_fallback");
    }

    #[tokio::test]
    async fn invalid_json_uses_rules() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text("definitely not json");
        let extractor = extractor_with(provider);

        let facts = extractor
            .extract("I love overnight trains", "s1", None, None)
            .await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_type, Some(FactType::Preference));
    }

    #[tokio::test]
    async fn empty_text_extracts_nothing() {
        let provider = QueueProvider::new("mock", 8);
        let extractor = extractor_with(provider);
        assert!(extractor.extract("   ", "s1", None, None).await.is_empty());
    }

    #[tokio::test]
    async fn segment_context_is_attached() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_error("down");
        let extractor = extractor_with(provider);

        let segment = TopicSegment {
            segment_id: "seg-1".to_string(),
            topic: "logistics".to_string(),
            summary: "Routing talk".to_string(),
            key_points: Vec::new(),
            turn_indices: Vec::new(),
            certainty: 0.8,
            impact: 0.6,
            participant_count: 2,
            message_count: 3,
            temporal_context: None,
        };
        let facts = extractor
            .extract("I prefer the night ferry", "s1", None, Some(&segment))
            .await;
        assert_eq!(facts[0].topic_segment_id.as_deref(), Some("seg-1"));
        assert_eq!(facts[0].topic_label.as_deref(), Some("logistics"));
    }
}
