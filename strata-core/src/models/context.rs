use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fact::Fact;
use super::turn::Turn;

/// Character-per-token heuristic used for prompt budgeting.
const CHARS_PER_TOKEN: f64 = 4.0;

/// Assembled context for prompt injection into agent conversations.
///
/// Aggregates recent L1 turns and CIAR-filtered L2 facts, optionally joined
/// by L3 episode summaries and L4 knowledge snippets. Rendering order is a
/// behavioral contract: facts of type `instruction` are emitted as an
/// `[ACTIVE STANDING ORDERS]` section ahead of all other memory content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBlock {
    pub session_id: String,

    pub recent_turns: Vec<Turn>,
    pub significant_facts: Vec<Fact>,
    #[serde(default)]
    pub episode_summaries: Vec<String>,
    #[serde(default)]
    pub knowledge_snippets: Vec<String>,

    pub min_ciar_threshold: f64,
    pub assembled_at: DateTime<Utc>,
    #[serde(default)]
    pub estimated_tokens: Option<usize>,
}

impl ContextBlock {
    #[must_use]
    pub fn new(session_id: impl Into<String>, min_ciar_threshold: f64) -> Self {
        Self {
            session_id: session_id.into(),
            recent_turns: Vec::new(),
            significant_facts: Vec::new(),
            episode_summaries: Vec::new(),
            knowledge_snippets: Vec::new(),
            min_ciar_threshold,
            assembled_at: Utc::now(),
            estimated_tokens: None,
        }
    }

    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.recent_turns.len()
    }

    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.significant_facts.len()
    }

    /// Render the block for prompt injection.
    ///
    /// Section order: standing orders (instruction facts) → key facts →
    /// recent conversation → related episodes → relevant knowledge.
    #[must_use]
    pub fn to_prompt_string(&self, include_metadata: bool) -> String {
        let mut sections: Vec<String> = Vec::new();

        let (standing_orders, regular_facts): (Vec<&Fact>, Vec<&Fact>) = self
            .significant_facts
            .iter()
            .partition(|fact| fact.is_instruction());

        if !standing_orders.is_empty() {
            sections.push("## [ACTIVE STANDING ORDERS]".to_string());
            for (i, fact) in standing_orders.iter().enumerate() {
                sections.push(format!("{}. {}", i + 1, fact.content));
            }
        }

        if !regular_facts.is_empty() {
            sections.push("\n## Key Facts (Working Memory)".to_string());
            for (i, fact) in regular_facts.iter().enumerate() {
                if include_metadata {
                    let fact_type = fact
                        .fact_type
                        .map_or("n/a", |t| t.as_str());
                    sections.push(format!(
                        "{}. {} [CIAR: {:.2}, Type: {}]",
                        i + 1,
                        fact.content,
                        fact.ciar_score,
                        fact_type
                    ));
                } else {
                    sections.push(format!("{}. {}", i + 1, fact.content));
                }
            }
        }

        if !self.recent_turns.is_empty() {
            sections.push("\n## Recent Conversation".to_string());
            // Chronological for the prompt; the window arrives newest-first.
            for (i, turn) in self.recent_turns.iter().rev().enumerate() {
                let role = turn.role.as_str().to_uppercase();
                if include_metadata {
                    sections.push(format!(
                        "{}. [{}] ({}): {}",
                        i + 1,
                        role,
                        turn.timestamp.to_rfc3339(),
                        turn.content
                    ));
                } else {
                    sections.push(format!("{}. [{}]: {}", i + 1, role, turn.content));
                }
            }
        }

        if !self.episode_summaries.is_empty() {
            sections.push("\n## Related Episodes (Episodic Memory)".to_string());
            for (i, summary) in self.episode_summaries.iter().enumerate() {
                sections.push(format!("{}. {}", i + 1, summary));
            }
        }

        if !self.knowledge_snippets.is_empty() {
            sections.push("\n## Relevant Knowledge (Semantic Memory)".to_string());
            for (i, snippet) in self.knowledge_snippets.iter().enumerate() {
                sections.push(format!("{}. {}", i + 1, snippet));
            }
        }

        sections.join("\n")
    }

    /// Estimate the token footprint and cache it on the block.
    pub fn estimate_token_count(&mut self) -> usize {
        let mut total_chars = 0usize;
        for turn in &self.recent_turns {
            total_chars += turn.content.len();
        }
        for fact in &self.significant_facts {
            total_chars += fact.content.len();
        }
        total_chars += self.episode_summaries.iter().map(String::len).sum::<usize>();
        total_chars += self.knowledge_snippets.iter().map(String::len).sum::<usize>();

        let estimated = (total_chars as f64 / CHARS_PER_TOKEN) as usize;
        self.estimated_tokens = Some(estimated);
        estimated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FactType, Role};

    #[test]
    fn standing_orders_precede_all_other_content() {
        let mut block = ContextBlock::new("s1", 0.6);
        block.recent_turns.push(Turn::new("s1", "t1", Role::User, "hi"));
        block.significant_facts.push(
            Fact::new("s1", "Customer prefers rail").with_type(FactType::Preference),
        );
        block.significant_facts.push(
            Fact::new("s1", "Always quote CO2 emissions in replies")
                .with_type(FactType::Instruction),
        );

        let rendered = block.to_prompt_string(false);
        let orders_pos = rendered.find("[ACTIVE STANDING ORDERS]").unwrap();
        let orders_content = rendered.find("Always quote CO2 emissions").unwrap();
        let facts_pos = rendered.find("Key Facts").unwrap();
        let convo_pos = rendered.find("Recent Conversation").unwrap();

        assert!(orders_pos < facts_pos);
        assert!(orders_content < facts_pos);
        assert!(facts_pos < convo_pos);
    }

    #[test]
    fn no_standing_orders_section_without_instruction_facts() {
        let mut block = ContextBlock::new("s1", 0.6);
        block
            .significant_facts
            .push(Fact::new("s1", "plain fact").with_type(FactType::Mention));
        assert!(!block.to_prompt_string(false).contains("STANDING ORDERS"));
    }

    #[test]
    fn conversation_renders_chronologically() {
        let mut block = ContextBlock::new("s1", 0.6);
        // Window arrives newest-first
        block.recent_turns.push(Turn::new("s1", "t2", Role::Assistant, "second"));
        block.recent_turns.push(Turn::new("s1", "t1", Role::User, "first"));

        let rendered = block.to_prompt_string(false);
        assert!(rendered.find("first").unwrap() < rendered.find("second").unwrap());
    }

    #[test]
    fn token_estimate_uses_character_heuristic() {
        let mut block = ContextBlock::new("s1", 0.6);
        block
            .recent_turns
            .push(Turn::new("s1", "t1", Role::User, "x".repeat(400)));
        assert_eq!(block.estimate_token_count(), 100);
        assert_eq!(block.estimated_tokens, Some(100));
    }
}
