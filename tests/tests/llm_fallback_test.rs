//! Ordered provider fallback and health reporting: a broken primary must
//! hand over to the next provider, and health probes must never raise.

use std::sync::Arc;
use std::time::Duration;

use strata_core::llm::{GenerateOptions, LlmClient, LlmProvider, ProviderConfig};
use strata_test_utils::MockProvider;

#[tokio::test]
async fn generation_falls_back_to_second_provider() {
    let client = LlmClient::new();
    client.register_provider(
        Arc::new(MockProvider::broken("primary")),
        Some(ProviderConfig::new("primary").with_priority(0)),
    );
    let secondary = Arc::new(MockProvider::new("secondary"));
    secondary.push_text("answer from the backup");
    client.register_provider(
        Arc::clone(&secondary) as Arc<dyn LlmProvider>,
        Some(ProviderConfig::new("secondary").with_priority(1)),
    );

    let response = client
        .generate("hello", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.provider, "secondary");
    assert_eq!(response.text, "answer from the backup");
}

#[tokio::test]
async fn health_reports_broken_and_healthy_providers() {
    let client = LlmClient::new();
    client.register_provider(Arc::new(MockProvider::broken("primary")), None);
    client.register_provider(Arc::new(MockProvider::new("secondary")), None);

    let mut reports = client.health_check().await;
    reports.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(reports.len(), 2);

    let primary = reports.iter().find(|r| r.name == "primary").unwrap();
    let secondary = reports.iter().find(|r| r.name == "secondary").unwrap();
    assert!(!primary.healthy);
    assert!(primary.last_error.is_some());
    assert!(secondary.healthy);
}

#[tokio::test]
async fn slow_provider_times_out_onto_the_next() {
    struct SlowProvider;

    #[async_trait::async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> strata_core::Result<strata_core::llm::LlmResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            unreachable!("the client must cancel this attempt first")
        }

        async fn embed(&self, _text: &str, _model: Option<&str>) -> strata_core::Result<Vec<f32>> {
            Err(strata_core::Error::Llm("unsupported".to_string()))
        }

        async fn health_check(&self) -> strata_core::llm::ProviderHealth {
            strata_core::llm::ProviderHealth {
                name: "slow".to_string(),
                healthy: true,
                details: None,
                last_error: None,
            }
        }
    }

    let client = LlmClient::new();
    client.register_provider(
        Arc::new(SlowProvider),
        Some(
            ProviderConfig::new("slow")
                .with_priority(0)
                .with_timeout(Duration::from_millis(50)),
        ),
    );
    let fast = Arc::new(MockProvider::new("fast"));
    fast.push_text("made it");
    client.register_provider(
        fast as Arc<dyn LlmProvider>,
        Some(ProviderConfig::new("fast").with_priority(1)),
    );

    let response = client
        .generate("hello", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.provider, "fast");
}

#[tokio::test]
async fn reregistration_replaces_the_prior_provider() {
    let client = LlmClient::new();
    client.register_provider(Arc::new(MockProvider::broken("p")), None);

    let replacement = Arc::new(MockProvider::new("p"));
    replacement.push_text("replaced");
    client.register_provider(replacement as Arc<dyn LlmProvider>, None);

    assert_eq!(client.available_providers(), vec!["p"]);
    let response = client
        .generate("x", &GenerateOptions::default())
        .await
        .unwrap();
    assert_eq!(response.text, "replaced");
}
