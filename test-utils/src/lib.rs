#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

//! Testing utilities for the strata workspace: a scripted LLM provider and
//! fixture builders for turns, facts, episodes, and knowledge documents.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use strata_core::error::{Error, Result};
use strata_core::llm::{
    GenerateOptions, LlmClient, LlmProvider, LlmResponse, ProviderConfig, ProviderHealth,
};
use strata_core::models::{
    EntityRef, Episode, Fact, FactCategory, FactType, KnowledgeDocument, KnowledgeType, Role,
    Turn,
};

/// A scripted LLM provider: generation replies are served from a FIFO
/// queue; embeddings are deterministic functions of the input text.
pub struct MockProvider {
    name: String,
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    embed_dim: usize,
    always_fail: bool,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(VecDeque::new()),
            embed_dim: 768,
            always_fail: false,
        }
    }

    /// Provider that fails every call; pairs with a healthy one to test
    /// ordered fallback.
    pub fn broken(name: impl Into<String>) -> Self {
        Self {
            always_fail: true,
            ..Self::new(name)
        }
    }

    pub fn with_embed_dim(mut self, dim: usize) -> Self {
        self.embed_dim = dim;
        self
    }

    /// Queue a successful text reply.
    pub fn push_text(&self, text: impl Into<String>) {
        self.responses.lock().push_back(Ok(text.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().push_back(Err(message.into()));
    }

    /// Remaining queued replies.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, _prompt: &str, _options: &GenerateOptions) -> Result<LlmResponse> {
        if self.always_fail {
            return Err(Error::Llm(format!("{} is scripted to fail", self.name)));
        }
        match self.responses.lock().pop_front() {
            Some(Ok(text)) => Ok(LlmResponse {
                text,
                provider: self.name.clone(),
                model: Some("mock".to_string()),
                usage: None,
            }),
            Some(Err(message)) => Err(Error::Llm(message)),
            None => Err(Error::Llm("no scripted response queued".to_string())),
        }
    }

    async fn embed(&self, text: &str, _model: Option<&str>) -> Result<Vec<f32>> {
        if self.always_fail {
            return Err(Error::Llm(format!("{} is scripted to fail", self.name)));
        }
        let seed = text.bytes().map(u32::from).sum::<u32>() as f32;
        Ok((0..self.embed_dim)
            .map(|i| ((seed + i as f32) % 97.0) / 97.0)
            .collect())
    }

    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth {
            name: self.name.clone(),
            healthy: !self.always_fail,
            details: (!self.always_fail).then(|| "OK".to_string()),
            last_error: self
                .always_fail
                .then(|| format!("{} is scripted to fail", self.name)),
        }
    }
}

/// An [`LlmClient`] with a single mock provider registered; returns the
/// provider handle for scripting.
pub fn mock_llm_client() -> (Arc<LlmClient>, Arc<MockProvider>) {
    let provider = Arc::new(MockProvider::new("mock"));
    let client = LlmClient::new();
    client.register_provider(
        Arc::clone(&provider) as Arc<dyn LlmProvider>,
        Some(ProviderConfig::new("mock")),
    );
    (Arc::new(client), provider)
}

/// A turn with a deterministic id; even indices are user turns.
pub fn sample_turn(session_id: &str, index: u32) -> Turn {
    Turn::new(
        session_id,
        format!("turn-{index:04}"),
        if index % 2 == 0 { Role::User } else { Role::Assistant },
        format!("Message number {index} about the Rotterdam rail corridor"),
    )
}

/// A fact above the default significance threshold.
pub fn significant_fact(session_id: &str, content: &str) -> Fact {
    Fact::new(session_id, content)
        .with_components(1.0, 0.8)
        .with_type(FactType::Preference)
        .with_category(FactCategory::Business)
}

/// A fact below the default significance threshold.
pub fn insignificant_fact(session_id: &str, content: &str) -> Fact {
    Fact::new(session_id, content)
        .with_components(0.5, 0.3)
        .with_type(FactType::Mention)
        .with_category(FactCategory::Personal)
}

/// An episode covering the last `hours` hours with one mentioned entity.
pub fn sample_episode(session_id: &str, hours: i64) -> Episode {
    let end = Utc::now();
    let start = end - Duration::hours(hours);
    Episode::new(
        session_id,
        "Customer consolidated weekly volumes onto the rail corridor",
        start,
        end,
    )
    .with_narrative("Across the window the customer moved all bookings to rail.")
    .with_source_facts(vec![uuid::Uuid::new_v4().to_string()])
    .with_entities(vec![EntityRef::new("Rotterdam", "location")])
    .with_importance(0.7)
}

/// A knowledge document with provenance over the given episode ids.
pub fn sample_document(
    id: &str,
    knowledge_type: KnowledgeType,
    source_episode_ids: Vec<String>,
) -> KnowledgeDocument {
    KnowledgeDocument::new(
        id,
        format!("Fixture document {id}"),
        "Rail is the preferred mode for non-urgent inland legs on this corridor.",
        knowledge_type,
        source_episode_ids,
    )
    .with_tags(vec!["rail".to_string(), "corridor".to_string()])
    .with_domain("logistics")
}
