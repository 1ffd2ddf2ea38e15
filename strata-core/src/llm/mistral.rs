//! Mistral provider (chat completions endpoint, OpenAI-compatible shape).

use async_trait::async_trait;
use tracing::warn;

use super::groq::chat_completions;
use super::{GenerateOptions, LlmProvider, LlmResponse, ProviderHealth};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_MODEL: &str = "mistral-small-latest";

pub struct MistralProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl MistralProvider {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmProvider for MistralProvider {
    fn name(&self) -> &str {
        "mistral"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<LlmResponse> {
        chat_completions(
            &self.client,
            &self.base_url,
            &self.api_key,
            self.name(),
            DEFAULT_MODEL,
            prompt,
            options,
        )
        .await
    }

    async fn embed(&self, _text: &str, _model: Option<&str>) -> Result<Vec<f32>> {
        Err(Error::Llm(
            "mistral embedding endpoint is not wired into this client".to_string(),
        ))
    }

    async fn health_check(&self) -> ProviderHealth {
        let probe = GenerateOptions::default().with_max_output_tokens(1);
        match self.generate("Ping", &probe).await {
            Ok(_) => ProviderHealth {
                name: self.name().to_string(),
                healthy: true,
                details: Some("OK".to_string()),
                last_error: None,
            },
            Err(e) => {
                warn!("Mistral health check failed: {e}");
                ProviderHealth {
                    name: self.name().to_string(),
                    healthy: false,
                    details: None,
                    last_error: Some(e.to_string()),
                }
            }
        }
    }
}
