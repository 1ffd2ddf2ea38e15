//! End-to-end cascade: turns in L1 promote to L2 facts, consolidate into a
//! dual-indexed L3 episode, distill into L4 knowledge, and answer queries
//! through the synthesizer — all against the in-memory adapter set with a
//! scripted LLM.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::config::SystemConfig;
use strata_core::engines::{CycleStatus, DistillationRequest};
use strata_core::models::{KnowledgeType, Role, Turn};
use strata_core::system::{ContextRequest, UnifiedMemorySystem};
use strata_test_utils::{mock_llm_client, sample_document, MockProvider};

async fn system_with_mock() -> (UnifiedMemorySystem, Arc<MockProvider>) {
    let (client, provider) = mock_llm_client();
    let system = UnifiedMemorySystem::in_memory(client, SystemConfig::default());
    system.initialize().await.unwrap();
    (system, provider)
}

#[tokio::test]
async fn promotion_consolidation_distillation_cascade() {
    let (system, provider) = system_with_mock().await;
    let session = "cascade-session";

    for i in 0..4 {
        let turn = Turn::new(
            session,
            format!("t{i}"),
            if i % 2 == 0 { Role::User } else { Role::Assistant },
            format!("I prefer rail for the weekly Rotterdam volume, message {i}"),
        );
        system.store_turn(&turn).await.unwrap();
    }

    // Promotion: segmentation reply + extraction reply
    provider.push_text(
        r#"{"segments": [{"topic": "routing", "summary": "Modal preference discussion", "turn_indices": [0,1,2,3], "certainty": 0.9, "impact": 0.8}]}"#,
    );
    provider.push_text(
        r#"{"facts": [
            {"content": "Customer prefers rail for weekly Rotterdam volume", "type": "preference", "category": "business", "certainty": 0.95, "impact": 0.9},
            {"content": "Volume is roughly 40 TEU per week", "type": "constraint", "category": "operational", "certainty": 0.9, "impact": 0.8}
        ]}"#,
    );
    let promotion = system.run_promotion_cycle(session).await;
    assert_eq!(promotion.status, CycleStatus::Completed);
    assert_eq!(promotion.facts_promoted, 2);
    assert_eq!(promotion.errors, 0);

    // Consolidation: one summary reply (embedding comes from the mock too)
    provider.push_text(
        r#"{"summary": "Customer committed weekly Rotterdam volume to rail", "narrative": "The customer settled on rail for the 40 TEU weekly flow."}"#,
    );
    let consolidation = system.run_consolidation_cycle(session).await;
    assert_eq!(consolidation.facts_retrieved, 2);
    assert_eq!(consolidation.episodes_created, 1);
    assert_eq!(consolidation.errors, 0);

    // The episode is dual-indexed with the bi-temporal invariants intact
    let episodes = system.l3().episodes_by_session(session, 10).await.unwrap();
    assert_eq!(episodes.len(), 1);
    let episode = system
        .l3()
        .retrieve(&episodes[0].episode_id)
        .await
        .unwrap()
        .unwrap();
    assert!(episode.fact_valid_from <= episode.source_observation_timestamp);
    assert_eq!(episode.source_fact_ids.len(), 2);
    assert!(episode.vector_id.is_some());
    assert!(system.l3().reconcile().await.unwrap().is_consistent());

    // Distillation: five template replies, forced past the threshold gate
    for _ in 0..5 {
        provider.push_text("Title: Corridor knowledge\ncontent about the rail corridor");
    }
    let distillation = system
        .run_distillation_cycle(&DistillationRequest {
            session_id: Some(session.to_string()),
            time_range: None,
            force: true,
        })
        .await;
    assert_eq!(distillation.documents_created, 5);
    assert_eq!(distillation.errors, 0);

    // Every document carries provenance back to the episode
    let state = system.memory_state(session).await.unwrap();
    assert_eq!(state.l1_turns, 4);
    assert_eq!(state.l2_facts, 2);
    assert_eq!(state.l3_episodes, 1);
    assert_eq!(state.l4_docs, 5);
}

#[tokio::test]
async fn repeated_promotion_with_no_new_content_promotes_nothing() {
    let (system, provider) = system_with_mock().await;
    let session = "idempotent-session";

    // No turns at all: the cycle skips below the minimum batch size
    let empty = system.run_promotion_cycle(session).await;
    assert!(empty.status.is_skipped());
    assert_eq!(empty.facts_promoted, 0);

    // With turns but an extraction that returns nothing new
    for i in 0..3 {
        system
            .store_turn(&Turn::new(session, format!("t{i}"), Role::User, "small talk"))
            .await
            .unwrap();
    }
    provider.push_text(r#"{"segments": [{"topic": "chat", "summary": "Small talk only"}]}"#);
    provider.push_text(r#"{"facts": []}"#);

    let stats = system.run_promotion_cycle(session).await;
    assert_eq!(stats.facts_promoted, 0);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn synthesis_surfaces_conflicting_recommendations() {
    let (system, provider) = system_with_mock().await;

    // Two recommendation documents with opposing polarity on the same facet
    let mut pro = sample_document(
        "k-pro",
        KnowledgeType::Recommendation,
        vec!["ep-1".to_string()],
    );
    pro.content = "You should always enable customs pre-clearance on this lane".to_string();
    let mut contra = sample_document(
        "k-contra",
        KnowledgeType::Recommendation,
        vec!["ep-2".to_string()],
    );
    contra.content = "Avoid customs pre-clearance on this lane, don't enable it".to_string();
    system.l4().store(&pro).await.unwrap();
    system.l4().store(&contra).await.unwrap();

    provider.push_text("Conflicting guidance exists (Documents 1 and 2).");
    let result = system
        .synthesize_knowledge("customs pre-clearance lane enable", &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(result.status, "success");
    assert!(result.has_conflicts);
    assert!(!result.conflicts.is_empty());
}

#[tokio::test]
async fn standing_orders_lead_the_rendered_context() {
    let (system, _provider) = system_with_mock().await;
    let session = "orders-session";

    system
        .store_turn(&Turn::new(session, "t1", Role::User, "what's the plan?"))
        .await
        .unwrap();
    let instruction = strata_core::models::Fact::new(
        session,
        "Always quote transit times in business days",
    )
    .with_components(1.0, 0.95)
    .with_type(strata_core::models::FactType::Instruction);
    system.l2().store(&instruction).await.unwrap();
    let regular = strata_test_utils::significant_fact(session, "Customer ships via Rotterdam");
    system.l2().store(&regular).await.unwrap();

    let block = system
        .get_context_block(session, &ContextRequest::default())
        .await
        .unwrap();
    let rendered = block.to_prompt_string(false);

    let orders_pos = rendered.find("[ACTIVE STANDING ORDERS]").expect("section present");
    let instruction_pos = rendered.find("business days").unwrap();
    let other_fact_pos = rendered.find("Rotterdam").unwrap();
    let conversation_pos = rendered.find("Recent Conversation").unwrap();
    assert!(orders_pos < instruction_pos);
    assert!(instruction_pos < other_fact_pos);
    assert!(instruction_pos < conversation_pos);
}

#[tokio::test]
async fn cascade_cleanup_preserves_referential_closure() {
    let (system, provider) = system_with_mock().await;
    let session = "cleanup-session";

    for i in 0..4 {
        system
            .store_turn(&Turn::new(
                session,
                format!("t{i}"),
                Role::User,
                "I prefer rail freight on this corridor",
            ))
            .await
            .unwrap();
    }
    provider.push_error("segmentation down"); // fallback segment
    provider.push_text(
        r#"{"facts": [{"content": "Prefers rail freight", "type": "preference", "category": "business", "certainty": 0.9, "impact": 0.9}]}"#,
    );
    system.run_promotion_cycle(session).await;
    provider.push_text(r#"{"summary": "Rail preference episode noted", "narrative": "n"}"#);
    system.run_consolidation_cycle(session).await;

    system.cleanup_session(session).await.unwrap();
    let state = system.memory_state(session).await.unwrap();
    assert_eq!(state.l1_turns, 0);
    assert_eq!(state.l2_facts, 0);
    assert_eq!(state.l3_episodes, 0);
    assert_eq!(state.l4_docs, 0);
}
