//! Groq provider (OpenAI-compatible chat completions endpoint).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::{GenerateOptions, LlmProvider, LlmResponse, ProviderHealth, TokenUsage};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

pub struct GroqProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
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

/// Shared chat-completions call for OpenAI-compatible endpoints.
pub(super) async fn chat_completions(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    provider: &str,
    default_model: &str,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<LlmResponse> {
    let model = options.model.as_deref().unwrap_or(default_model);

    let mut messages = Vec::new();
    if let Some(system) = &options.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": options.temperature.unwrap_or(0.0),
        "max_tokens": options.max_output_tokens.unwrap_or(1024),
    });
    // No schema-constrained mode here; JSON object mode is the closest fit
    if options.schema.is_some() {
        body["response_format"] = json!({"type": "json_object"});
    }

    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Connection(format!("{provider} request failed: {e}")))?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| Error::Connection(format!("{provider} response unreadable: {e}")))?;

    if !status.is_success() {
        return Err(Error::Query(format!("{provider} error ({status}): {payload}")));
    }

    let text = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| Error::Llm(format!("{provider} reply missing content: {payload}")))?
        .to_string();

    let usage = payload.get("usage").map(|usage| TokenUsage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64),
    });

    Ok(LlmResponse {
        text,
        provider: provider.to_string(),
        model: Some(model.to_string()),
        usage,
    })
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
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
        Err(Error::Llm("groq does not expose an embedding endpoint".to_string()))
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
                warn!("Groq health check failed: {e}");
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
