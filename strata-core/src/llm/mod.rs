//! # LLM Client
//!
//! A single `generate` interface over N provider backends with ordered
//! fallback. Providers register with `{name, timeout, priority, enabled}`;
//! the effective order is the explicit override or ascending priority of
//! enabled providers, with any registered-but-unordered provider appended
//! at the tail. Each attempt is bounded by the provider's timeout; the last
//! error surfaces when every provider fails.

mod gemini;
mod groq;
mod mistral;

pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use mistral::MistralProvider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Standardized response returned from every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Token accounting reported by a provider, when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// Runtime health report for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Configuration metadata used to prioritize and time-bound providers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub timeout: Duration,
    pub priority: i32,
    pub enabled: bool,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_secs(15),
            priority: 0,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Generation request options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// System instruction prepended by providers that support one
    pub system: Option<String>,
    /// JSON schema for providers with schema-constrained generation;
    /// providers without support honor the schema-less path
    pub schema: Option<Value>,
    /// Explicit provider order override
    pub provider_order: Option<Vec<String>>,
}

impl GenerateOptions {
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Provider wrapper interface for the orchestrating client.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Generate text for the supplied prompt.
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<LlmResponse>;

    /// Generate an embedding vector.
    ///
    /// # Errors
    ///
    /// Providers without an embedding endpoint return [`Error::Llm`].
    async fn embed(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>>;

    /// Lightweight probe. Must report `healthy=false` instead of raising.
    async fn health_check(&self) -> ProviderHealth;
}

struct Registered {
    provider: Arc<dyn LlmProvider>,
    config: ProviderConfig,
}

/// Multi-provider orchestrator with fallback support and health
/// diagnostics.
#[derive(Default)]
pub struct LlmClient {
    providers: RwLock<HashMap<String, Registered>>,
}

impl LlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client from environment keys, registering whichever of
    /// Gemini (`GOOGLE_API_KEY`), Groq (`GROQ_API_KEY`), and Mistral
    /// (`MISTRAL_API_KEY`) are configured, priority in that order.
    #[must_use]
    pub fn from_env() -> Self {
        let client = Self::new();
        if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
            client.register_provider(
                Arc::new(GeminiProvider::new(key)),
                Some(ProviderConfig::new("gemini").with_priority(0)),
            );
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            client.register_provider(
                Arc::new(GroqProvider::new(key)),
                Some(ProviderConfig::new("groq").with_priority(1)),
            );
        }
        if let Ok(key) = std::env::var("MISTRAL_API_KEY") {
            client.register_provider(
                Arc::new(MistralProvider::new(key)),
                Some(ProviderConfig::new("mistral").with_priority(2)),
            );
        }
        let count = client.available_providers().len();
        info!("LLM client initialized with {count} provider(s)");
        client
    }

    /// Register a provider. Re-registering a name replaces the prior
    /// registration.
    pub fn register_provider(
        &self,
        provider: Arc<dyn LlmProvider>,
        config: Option<ProviderConfig>,
    ) {
        let name = provider.name().to_string();
        let config = config.unwrap_or_else(|| ProviderConfig::new(name.clone()));
        self.providers
            .write()
            .insert(name, Registered { provider, config });
    }

    /// Remove a provider from future generation attempts.
    pub fn deregister_provider(&self, name: &str) {
        self.providers.write().remove(name);
    }

    /// Currently registered provider names.
    #[must_use]
    pub fn available_providers(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }

    fn resolve_order(&self, override_order: Option<&[String]>) -> Vec<(Arc<dyn LlmProvider>, ProviderConfig)> {
        let providers = self.providers.read();

        let mut order: Vec<String> = match override_order {
            Some(explicit) => explicit
                .iter()
                .filter(|name| providers.contains_key(*name))
                .cloned()
                .collect(),
            None => {
                let mut names: Vec<&String> = providers
                    .iter()
                    .filter(|(_, r)| r.config.enabled)
                    .map(|(name, _)| name)
                    .collect();
                names.sort_by_key(|name| providers[*name].config.priority);
                names.into_iter().cloned().collect()
            }
        };

        // Registered-but-unordered enabled providers go to the tail
        for (name, registered) in providers.iter() {
            if registered.config.enabled && !order.contains(name) {
                order.push(name.clone());
            }
        }

        order
            .into_iter()
            .filter_map(|name| {
                providers.get(&name).and_then(|registered| {
                    registered.config.enabled.then(|| {
                        (
                            Arc::clone(&registered.provider),
                            registered.config.clone(),
                        )
                    })
                })
            })
            .collect()
    }

    /// Attempt generation across providers in the effective order.
    ///
    /// # Errors
    ///
    /// Surfaces the last provider error when none succeeds.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<LlmResponse> {
        let order = self.resolve_order(options.provider_order.as_deref());
        if order.is_empty() {
            return Err(Error::Llm("no LLM provider available".to_string()));
        }

        let mut last_error: Option<Error> = None;
        for (provider, config) in order {
            let name = provider.name().to_string();
            match tokio::time::timeout(config.timeout, provider.generate(prompt, options)).await {
                Ok(Ok(mut response)) => {
                    if response.provider.is_empty() {
                        response.provider = name;
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    warn!("Provider '{name}' failed: {e}");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Provider '{name}' timed out after {:?}", config.timeout);
                    last_error = Some(Error::Timeout(format!(
                        "provider {name} exceeded {:?}",
                        config.timeout
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Llm("no healthy LLM provider available".to_string())))
    }

    /// Request an embedding from the first provider able to produce one.
    ///
    /// # Errors
    ///
    /// Surfaces the last provider error when none succeeds.
    pub async fn embed(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>> {
        let order = self.resolve_order(None);
        if order.is_empty() {
            return Err(Error::Llm("no LLM provider available".to_string()));
        }

        let mut last_error: Option<Error> = None;
        for (provider, config) in order {
            let name = provider.name().to_string();
            match tokio::time::timeout(config.timeout, provider.embed(text, model)).await {
                Ok(Ok(embedding)) => {
                    debug!("Embedding from '{name}': {} dims", embedding.len());
                    return Ok(embedding);
                }
                Ok(Err(e)) => {
                    warn!("Embedding via '{name}' failed: {e}");
                    last_error = Some(e);
                }
                Err(_) => {
                    last_error = Some(Error::Timeout(format!(
                        "provider {name} exceeded {:?}",
                        config.timeout
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Llm("no embedding provider available".to_string())))
    }

    /// Probe every registered provider concurrently. A probe failure is
    /// reported as `healthy=false`, never raised.
    pub async fn health_check(&self) -> Vec<ProviderHealth> {
        let providers: Vec<Arc<dyn LlmProvider>> = self
            .providers
            .read()
            .values()
            .map(|registered| Arc::clone(&registered.provider))
            .collect();

        join_all(providers.iter().map(|provider| provider.health_check())).await
    }
}

/// Strip surrounding markdown code fences from an LLM reply.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
