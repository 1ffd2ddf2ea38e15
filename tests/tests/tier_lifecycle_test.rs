//! L1/L2 lifecycle over the embedded backends: windowing, hot/cold
//! recovery, and the significance gate.

use std::sync::Arc;

use strata_core::metrics::MetricsCollector;
use strata_core::models::{Role, Turn};
use strata_core::storage::{KvListStore, RelationalStore};
use strata_core::tiers::{
    ActiveContextConfig, ActiveContextTier, WorkingMemoryConfig, WorkingMemoryTier,
};
use strata_storage_redb::RedbKvStore;
use strata_storage_turso::TursoRelationalStore;
use strata_test_utils::{insignificant_fact, significant_fact};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    kv: Arc<RedbKvStore>,
    relational: Arc<TursoRelationalStore>,
    l1: ActiveContextTier,
    l2: WorkingMemoryTier,
}

async fn fixture(window_size: usize) -> Fixture {
    let dir = TempDir::new().unwrap();
    let kv = Arc::new(
        RedbKvStore::open(&dir.path().join("kv.redb"))
            .await
            .unwrap(),
    );
    let relational = Arc::new(
        TursoRelationalStore::connect(
            &format!("file:{}", dir.path().join("mem.db").display()),
            "",
        )
        .await
        .unwrap(),
    );
    relational.initialize().await.unwrap();
    relational.verify_fulltext_index().await.unwrap();

    let metrics = Arc::new(MetricsCollector::default());
    let l1 = ActiveContextTier::new(
        Arc::clone(&kv) as Arc<dyn KvListStore>,
        Arc::clone(&relational) as Arc<dyn RelationalStore>,
        Arc::clone(&metrics),
        ActiveContextConfig {
            window_size,
            ..ActiveContextConfig::default()
        },
    );
    let l2 = WorkingMemoryTier::new(
        Arc::clone(&relational) as Arc<dyn RelationalStore>,
        metrics,
        WorkingMemoryConfig::default(),
    );

    Fixture {
        _dir: dir,
        kv,
        relational,
        l1,
        l2,
    }
}

fn monotonic_turn(session: &str, i: u32) -> Turn {
    Turn::new(session, format!("{i}"), Role::User, format!("message {i}"))
        .with_timestamp(chrono::Utc::now() + chrono::Duration::milliseconds(i64::from(i)))
}

#[tokio::test]
async fn l1_window_keeps_five_newest_of_ten() {
    let f = fixture(5).await;
    for i in 0..10 {
        f.l1.store(&monotonic_turn("s1", i)).await.unwrap();
    }

    let window = f.l1.retrieve_session("s1").await.unwrap();
    assert_eq!(window.len(), 5);
    let ids: Vec<&str> = window.iter().map(|t| t.turn_id.as_str()).collect();
    assert_eq!(ids, vec!["9", "8", "7", "6", "5"]);
    assert_eq!(f.l1.window_count("s1").await, 5);
    assert!(f
        .kv
        .ttl("{session:s1}:turns")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn cold_rebuild_matches_original_head_ordering() {
    let f = fixture(10).await;
    for i in 0..6 {
        f.l1.store(&monotonic_turn("s1", i)).await.unwrap();
    }
    let original: Vec<String> = f
        .l1
        .retrieve_session("s1")
        .await
        .unwrap()
        .iter()
        .map(|t| t.turn_id.clone())
        .collect();

    // Lose the hot cache, then read through the cold path
    f.kv.delete_key("{session:s1}:turns").await.unwrap();
    let recovered: Vec<String> = f
        .l1
        .retrieve_session("s1")
        .await
        .unwrap()
        .iter()
        .map(|t| t.turn_id.clone())
        .collect();
    assert_eq!(recovered, original);

    // The rebuilt hot window serves the same order
    let hot: Vec<String> = f
        .l1
        .retrieve_session("s1")
        .await
        .unwrap()
        .iter()
        .map(|t| t.turn_id.clone())
        .collect();
    assert_eq!(hot, original);
    assert_eq!(f.l1.window_count("s1").await, 6);
}

#[tokio::test]
async fn l2_significance_gate_and_access_bookkeeping() {
    let f = fixture(5).await;

    // Below threshold: rejected, nothing written
    let rejected = f.l2.store(&insignificant_fact("s1", "noise")).await;
    assert!(rejected.is_err());
    assert_eq!(f.l2.count(Some("s1")).await.unwrap(), 0);

    // Above threshold: stored; first read returns access_count 0
    let fact_id = f
        .l2
        .store(&significant_fact("s1", "Customer prefers rail"))
        .await
        .unwrap();
    let first = f.l2.retrieve(&fact_id).await.unwrap().unwrap();
    assert_eq!(first.access_count, 0);

    // Second read observes the bump: count 1, boost 1.05, score recomputed
    let second = f.l2.retrieve(&fact_id).await.unwrap().unwrap();
    assert_eq!(second.access_count, 1);
    assert!((second.recency_boost - 1.05).abs() < 1e-9);
    assert!(second.recency_boost > first.recency_boost);
    assert!((second.ciar_score - second.expected_score()).abs() <= 0.01);
}

#[tokio::test]
async fn l2_default_queries_only_return_gated_facts() {
    let f = fixture(5).await;
    f.l2.store(&significant_fact("s1", "strong fact one"))
        .await
        .unwrap();
    f.l2.store(&significant_fact("s1", "strong fact two"))
        .await
        .unwrap();

    let facts = f.l2.query_by_session("s1", None, 10).await.unwrap();
    assert_eq!(facts.len(), 2);
    assert!(facts.iter().all(|fact| fact.ciar_score >= 0.6));
    assert!(facts
        .windows(2)
        .all(|pair| pair[0].ciar_score >= pair[1].ciar_score));
}

#[tokio::test]
async fn fulltext_index_is_verified_and_searchable() {
    let f = fixture(5).await;
    f.l2.store(&significant_fact("s1", "Customer prefers rail shipments over road"))
        .await
        .unwrap();

    let hits = f.l2.search_text("s1", "shipment", 5).await.unwrap();
    assert_eq!(hits.len(), 1);

    // Direct adapter-level probe also passes
    f.relational.verify_fulltext_index().await.unwrap();
}

#[tokio::test]
async fn deleting_missing_entities_returns_false_everywhere() {
    let f = fixture(5).await;
    assert!(!f.l1.delete_session("ghost").await.unwrap());
    assert!(!f.l2.delete("ghost").await.unwrap());
}
