//! Topic segmentation: one LLM call compresses a batch of L1 turns into
//! coherent topic segments. Failure never propagates — a single synthetic
//! segment covering all turns (at low certainty) stands in.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::llm::{strip_code_fences, GenerateOptions, LlmClient};
use crate::models::Turn;

/// Certainty assigned to the synthetic fallback segment.
const FALLBACK_CERTAINTY: f64 = 0.3;

/// Segmenter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Batches below this size are not segmented
    pub min_turns: usize,
    pub model: Option<String>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_turns: 3,
            model: None,
        }
    }
}

/// A coherent topic segment extracted from a batch of turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSegment {
    pub segment_id: String,
    pub topic: String,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Indices into the chronological turn batch
    #[serde(default)]
    pub turn_indices: Vec<usize>,
    pub certainty: f64,
    pub impact: f64,
    #[serde(default)]
    pub participant_count: usize,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub temporal_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    topic: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    turn_indices: Vec<usize>,
    certainty: Option<f64>,
    impact: Option<f64>,
    #[serde(default)]
    participant_count: Option<usize>,
    #[serde(default)]
    message_count: Option<usize>,
    #[serde(default)]
    temporal_context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentationReply {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

/// Splits turn batches into topic segments via a single LLM call.
pub struct TopicSegmenter {
    llm: Arc<LlmClient>,
    config: SegmenterConfig,
}

impl TopicSegmenter {
    #[must_use]
    pub fn new(llm: Arc<LlmClient>, config: SegmenterConfig) -> Self {
        Self { llm, config }
    }

    #[must_use]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment a chronological batch of turns. Never errors: on any LLM or
    /// parse failure a single synthetic segment covers the whole batch.
    pub async fn segment_turns(&self, turns: &[Turn]) -> Vec<TopicSegment> {
        if turns.is_empty() {
            return Vec::new();
        }
        if turns.len() < self.config.min_turns {
            debug!(
                "Turn count {} below minimum {}; using single segment",
                turns.len(),
                self.config.min_turns
            );
            return vec![self.fallback_segment(turns)];
        }

        match self.segment_with_llm(turns).await {
            Ok(segments) if !segments.is_empty() => segments,
            Ok(_) => {
                warn!("Segmentation returned no segments; using fallback");
                vec![self.fallback_segment(turns)]
            }
            Err(e) => {
                warn!("Topic segmentation failed: {e}; using fallback");
                vec![self.fallback_segment(turns)]
            }
        }
    }

    async fn segment_with_llm(&self, turns: &[Turn]) -> crate::error::Result<Vec<TopicSegment>> {
        let transcript: String = turns
            .iter()
            .enumerate()
            .map(|(i, turn)| format!("[{i}] {}: {}\n", turn.role, turn.content))
            .collect();

        let prompt = format!(
            "Segment the following conversation into coherent topics. Return a JSON \
             object with a key \"segments\": a list where each segment has \"topic\", \
             \"summary\", \"key_points\" (list), \"turn_indices\" (list of the turn \
             numbers in brackets), \"certainty\" (0.0-1.0), \"impact\" (0.0-1.0), \
             \"participant_count\", \"message_count\", and optional \
             \"temporal_context\".\n\nConversation:\n{transcript}\nOutput JSON:"
        );

        let schema = json!({
            "type": "object",
            "properties": {
                "segments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "topic": {"type": "string"},
                            "summary": {"type": "string"},
                            "key_points": {"type": "array", "items": {"type": "string"}},
                            "turn_indices": {"type": "array", "items": {"type": "integer"}},
                            "certainty": {"type": "number"},
                            "impact": {"type": "number"},
                            "participant_count": {"type": "integer"},
                            "message_count": {"type": "integer"},
                            "temporal_context": {"type": "string"}
                        },
                        "required": ["topic", "summary"]
                    }
                }
            },
            "required": ["segments"]
        });

        let mut options = GenerateOptions::default()
            .with_temperature(0.3)
            .with_max_output_tokens(1024)
            .with_schema(schema);
        options.model.clone_from(&self.config.model);

        let response = self.llm.generate(&prompt, &options).await?;
        let reply: SegmentationReply =
            serde_json::from_str(strip_code_fences(&response.text))?;

        let segments = reply
            .segments
            .into_iter()
            .filter_map(|raw| {
                // A segment without topic and summary is unusable
                let topic = raw.topic?;
                let summary = raw.summary?;
                Some(TopicSegment {
                    segment_id: Uuid::new_v4().to_string(),
                    topic,
                    summary,
                    key_points: raw.key_points,
                    turn_indices: raw
                        .turn_indices
                        .into_iter()
                        .filter(|&i| i < turns.len())
                        .collect(),
                    certainty: raw.certainty.unwrap_or(0.7).clamp(0.0, 1.0),
                    impact: raw.impact.unwrap_or(0.5).clamp(0.0, 1.0),
                    participant_count: raw.participant_count.unwrap_or(2),
                    message_count: raw.message_count.unwrap_or(turns.len()),
                    temporal_context: raw.temporal_context,
                })
            })
            .collect();

        Ok(segments)
    }

    fn fallback_segment(&self, turns: &[Turn]) -> TopicSegment {
        let summary = turns
            .first()
            .map(|turn| {
                let content: String = turn.content.chars().take(120).collect();
                format!("Conversation starting with: {content}")
            })
            .unwrap_or_else(|| "Conversation batch".to_string());

        TopicSegment {
            segment_id: Uuid::new_v4().to_string(),
            topic: "general".to_string(),
            summary,
            key_points: Vec::new(),
            turn_indices: (0..turns.len()).collect(),
            certainty: FALLBACK_CERTAINTY,
            impact: 0.5,
            participant_count: 2,
            message_count: turns.len(),
            temporal_context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::QueueProvider;
    use crate::models::Role;

    fn turns(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| Turn::new("s1", format!("t{i}"), Role::User, format!("message {i}")))
            .collect()
    }

    fn client_with(provider: QueueProvider) -> Arc<LlmClient> {
        let client = LlmClient::new();
        client.register_provider(Arc::new(provider), None);
        Arc::new(client)
    }

    #[tokio::test]
    async fn parses_llm_segments() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text(
            r#"{"segments": [
                {"topic": "shipping", "summary": "Discussed rail routing", "turn_indices": [0, 1], "certainty": 0.9, "impact": 0.8},
                {"topic": "billing", "summary": "Invoice questions", "turn_indices": [2], "certainty": 0.7, "impact": 0.4}
            ]}"#,
        );
        let segmenter = TopicSegmenter::new(client_with(provider), SegmenterConfig::default());

        let segments = segmenter.segment_turns(&turns(3)).await;
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].topic, "shipping");
        assert_eq!(segments[0].turn_indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_synthetic_segment() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_error("provider down");
        let segmenter = TopicSegmenter::new(client_with(provider), SegmenterConfig::default());

        let segments = segmenter.segment_turns(&turns(5)).await;
        assert_eq!(segments.len(), 1);
        assert!((segments[0].certainty - 0.3).abs() < f64::EPSILON);
        assert_eq!(segments[0].turn_indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn invalid_json_falls_back() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text("not json at all");
        let segmenter = TopicSegmenter::new(client_with(provider), SegmenterConfig::default());

        let segments = segmenter.segment_turns(&turns(4)).await;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].topic, "general");
    }

    #[tokio::test]
    async fn small_batches_skip_the_llm() {
        let provider = QueueProvider::new("mock", 8); // no responses queued
        let segmenter = TopicSegmenter::new(client_with(provider), SegmenterConfig::default());

        let segments = segmenter.segment_turns(&turns(2)).await;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].message_count, 2);
    }

    #[tokio::test]
    async fn markdown_fenced_reply_is_accepted() {
        let provider = QueueProvider::new("mock", 8);
        provider.push_text(
            "```json\n{\"segments\": [{\"topic\": \"t\", \"summary\": \"s\"}]}\n```",
        );
        let segmenter = TopicSegmenter::new(client_with(provider), SegmenterConfig::default());

        let segments = segmenter.segment_turns(&turns(3)).await;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].topic, "t");
    }
}
