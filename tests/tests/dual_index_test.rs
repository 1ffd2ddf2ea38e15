//! L3 dual indexing: an episode stored with a 768-dim embedding and one
//! entity must be visible in both the vector scroll and the graph session
//! query, with the graph node's vector id matching the vector point id.

use std::sync::Arc;

use strata_core::metrics::MetricsCollector;
use strata_core::storage::memory::{InMemoryGraphStore, InMemoryVectorStore};
use strata_core::storage::{GraphStore, PayloadFilter, VectorStore};
use strata_core::tiers::{EpisodicConfig, EpisodicMemoryTier};
use strata_test_utils::sample_episode;

fn tier() -> (
    EpisodicMemoryTier,
    Arc<InMemoryVectorStore>,
    Arc<InMemoryGraphStore>,
) {
    let vector = Arc::new(InMemoryVectorStore::new());
    let graph = Arc::new(InMemoryGraphStore::new());
    let tier = EpisodicMemoryTier::new(
        Arc::clone(&vector) as Arc<dyn VectorStore>,
        Arc::clone(&graph) as Arc<dyn GraphStore>,
        Arc::new(MetricsCollector::default()),
        EpisodicConfig::default(),
    );
    (tier, vector, graph)
}

#[tokio::test]
async fn episode_visible_in_both_indexes_with_matching_ids() {
    let (tier, vector, graph) = tier();
    tier.initialize().await.unwrap();

    let mut episode = sample_episode("s1", 3);
    tier.store(&mut episode, vec![0.25; 768]).await.unwrap();
    let vector_id = episode.vector_id.clone().expect("vector id assigned");

    // Vector side: scroll filtered by session_id finds the episode id
    let filter = PayloadFilter::new().must_match("session_id", "s1");
    let points = vector.scroll("episodes", Some(&filter), 10).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(
        points[0].payload["episode_id"],
        serde_json::json!(episode.episode_id)
    );
    assert_eq!(points[0].id, vector_id);

    // Graph side: the session query returns the node, backref intact
    let nodes = graph.episodes_by_session("s1", 10).await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].episode_id, episode.episode_id);
    assert_eq!(nodes[0].vector_id.as_deref(), Some(vector_id.as_str()));

    // And the MENTIONS edge landed with the entity
    let entities = tier.episode_entities(&episode.episode_id).await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].name, "Rotterdam");
}

#[tokio::test]
async fn readers_tolerate_one_sided_presence_during_reconciliation_window() {
    let (tier, _vector, graph) = tier();
    tier.initialize().await.unwrap();

    // Graph-only episode (as if the vector write failed mid-store)
    let orphan = sample_episode("s1", 2);
    graph
        .upsert_episode_node(&strata_core::storage::GraphEpisode::from_episode(&orphan))
        .await
        .unwrap();

    // Reads still serve the graph-side projection
    let fetched = tier.retrieve(&orphan.episode_id).await.unwrap().unwrap();
    assert_eq!(fetched.summary, orphan.summary);

    // And the drift is visible to the operator
    let report = tier.reconcile().await.unwrap();
    assert_eq!(report.missing_in_vector, vec![orphan.episode_id]);
}

#[tokio::test]
async fn similarity_search_carries_similarity_scores() {
    let (tier, ..) = tier();
    tier.initialize().await.unwrap();

    let mut episode = sample_episode("s1", 1);
    tier.store(&mut episode, vec![1.0; 768]).await.unwrap();

    let matches = tier.search_similar(&vec![1.0; 768], Some("s1"), 5).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].similarity_score > 0.99);
}

#[tokio::test]
async fn deleting_an_episode_clears_both_indexes() {
    let (tier, vector, graph) = tier();
    tier.initialize().await.unwrap();

    let mut episode = sample_episode("s1", 1);
    tier.store(&mut episode, vec![0.5; 768]).await.unwrap();
    let vector_id = episode.vector_id.clone().unwrap();

    assert!(tier.delete(&episode.episode_id).await.unwrap());
    assert!(graph
        .get_episode_node(&episode.episode_id)
        .await
        .unwrap()
        .is_none());
    assert!(vector
        .retrieve_point("episodes", &vector_id)
        .await
        .unwrap()
        .is_none());
    assert!(!tier.delete(&episode.episode_id).await.unwrap());
}
