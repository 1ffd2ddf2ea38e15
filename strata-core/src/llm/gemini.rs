//! Google Gemini provider (REST `generateContent` / `embedContent`).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::{GenerateOptions, LlmProvider, LlmResponse, ProviderHealth, TokenUsage};
use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
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

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!(
            "{}/{path}?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("gemini request failed: {e}")))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("gemini response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(Error::Query(format!("gemini error ({status}): {payload}")));
        }
        Ok(payload)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<LlmResponse> {
        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);

        let mut generation_config = json!({
            "temperature": options.temperature.unwrap_or(0.0),
            "maxOutputTokens": options.max_output_tokens.unwrap_or(1024),
        });
        if let Some(schema) = &options.schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let mut body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        });
        if let Some(system) = &options.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let payload = self
            .post(&format!("models/{model}:generateContent"), &body)
            .await?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::Llm(format!("gemini reply missing text: {payload}")))?
            .to_string();

        let usage = payload.get("usageMetadata").map(|meta| TokenUsage {
            prompt_tokens: meta.get("promptTokenCount").and_then(Value::as_u64),
            completion_tokens: meta.get("candidatesTokenCount").and_then(Value::as_u64),
            total_tokens: meta.get("totalTokenCount").and_then(Value::as_u64),
        });

        Ok(LlmResponse {
            text,
            provider: self.name().to_string(),
            model: Some(model.to_string()),
            usage,
        })
    }

    async fn embed(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>> {
        let model = model.unwrap_or(DEFAULT_EMBEDDING_MODEL);
        let body = json!({"content": {"parts": [{"text": text}]}});
        let payload = self
            .post(&format!("models/{model}:embedContent"), &body)
            .await?;

        payload["embedding"]["values"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .ok_or_else(|| Error::Llm(format!("gemini embedding missing values: {payload}")))
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
                warn!("Gemini health check failed: {e}");
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
