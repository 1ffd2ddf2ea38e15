use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{Fact, FactQuery, Turn, TurnQuery};
use crate::storage::{AdapterHealth, RelationalStore};

#[derive(Debug, Clone)]
struct TurnRow {
    turn: Turn,
    #[allow(dead_code)]
    ttl_expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    active_context: Vec<TurnRow>,
    working_memory: HashMap<String, Fact>,
}

/// In-memory relational store over the `active_context` and
/// `working_memory` tables.
#[derive(Debug, Default)]
pub struct InMemoryRelationalStore {
    tables: Mutex<Tables>,
}

impl InMemoryRelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Shared ordering/filtering used by every fact query: CIAR floor,
/// type/category/time filters, then `ciar_score DESC, last_accessed DESC`.
pub(crate) fn select_facts(facts: Vec<Fact>, query: &FactQuery) -> Vec<Fact> {
    let mut selected: Vec<Fact> = facts
        .into_iter()
        .filter(|fact| {
            query
                .session_id
                .as_ref()
                .is_none_or(|session| &fact.session_id == session)
        })
        .filter(|fact| {
            query.include_low_ciar
                || query.min_ciar.is_none_or(|floor| fact.ciar_score >= floor)
        })
        .filter(|fact| {
            query.fact_types.is_empty()
                || fact
                    .fact_type
                    .is_some_and(|t| query.fact_types.contains(&t))
        })
        .filter(|fact| {
            query.fact_categories.is_empty()
                || fact
                    .fact_category
                    .is_some_and(|c| query.fact_categories.contains(&c))
        })
        .filter(|fact| {
            query
                .extracted_after
                .is_none_or(|after| fact.extracted_at >= after)
        })
        .filter(|fact| {
            query
                .extracted_before
                .is_none_or(|before| fact.extracted_at <= before)
        })
        .collect();

    selected.sort_by(|a, b| {
        b.ciar_score
            .partial_cmp(&a.ciar_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_accessed.cmp(&a.last_accessed))
    });
    selected.truncate(query.limit);
    selected
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    fn name(&self) -> &'static str {
        "memory_relational"
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn verify_fulltext_index(&self) -> Result<()> {
        // Substring scan stands in for the index; always available
        Ok(())
    }

    async fn insert_turn(&self, turn: &Turn, ttl_expires_at: DateTime<Utc>) -> Result<()> {
        self.tables.lock().active_context.push(TurnRow {
            turn: turn.clone(),
            ttl_expires_at,
        });
        Ok(())
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        Ok(self
            .tables
            .lock()
            .active_context
            .iter()
            .find(|row| row.turn.turn_id == turn_id)
            .map(|row| row.turn.clone()))
    }

    async fn query_turns(&self, query: &TurnQuery) -> Result<Vec<Turn>> {
        let tables = self.tables.lock();
        let mut turns: Vec<Turn> = tables
            .active_context
            .iter()
            .map(|row| row.turn.clone())
            .filter(|turn| {
                query
                    .session_id
                    .as_ref()
                    .is_none_or(|session| &turn.session_id == session)
            })
            .filter(|turn| query.role.is_none_or(|role| turn.role == role))
            .filter(|turn| query.after.is_none_or(|after| turn.timestamp >= after))
            .filter(|turn| query.before.is_none_or(|before| turn.timestamp <= before))
            .collect();

        turns.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            turns.truncate(limit);
        }
        Ok(turns)
    }

    async fn delete_turns_by_session(&self, session_id: &str) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.active_context.len();
        tables
            .active_context
            .retain(|row| row.turn.session_id != session_id);
        Ok((before - tables.active_context.len()) as u64)
    }

    async fn insert_fact(&self, fact: &Fact) -> Result<()> {
        self.tables
            .lock()
            .working_memory
            .insert(fact.fact_id.clone(), fact.clone());
        Ok(())
    }

    async fn insert_facts(&self, facts: &[Fact]) -> Result<()> {
        let mut tables = self.tables.lock();
        for fact in facts {
            tables
                .working_memory
                .insert(fact.fact_id.clone(), fact.clone());
        }
        Ok(())
    }

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>> {
        Ok(self.tables.lock().working_memory.get(fact_id).cloned())
    }

    async fn update_fact(&self, fact: &Fact) -> Result<bool> {
        let mut tables = self.tables.lock();
        if tables.working_memory.contains_key(&fact.fact_id) {
            tables
                .working_memory
                .insert(fact.fact_id.clone(), fact.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn bump_fact_access(
        &self,
        fact_id: &str,
        accessed_at: DateTime<Utc>,
        alpha: f64,
        max_boost: f64,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        let Some(fact) = tables.working_memory.get_mut(fact_id) else {
            return Ok(false);
        };
        fact.access_count += 1;
        fact.last_accessed = accessed_at;
        fact.recency_boost =
            (1.0 + alpha * fact.access_count as f64).min(1.0 + max_boost);
        fact.recompute_score();
        Ok(true)
    }

    async fn query_facts(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        let facts: Vec<Fact> = self.tables.lock().working_memory.values().cloned().collect();
        Ok(select_facts(facts, query))
    }

    async fn search_facts_text(
        &self,
        session_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let needle = text.to_lowercase();
        let mut matches: Vec<Fact> = self
            .tables
            .lock()
            .working_memory
            .values()
            .filter(|fact| fact.session_id == session_id)
            .filter(|fact| fact.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.ciar_score
                .partial_cmp(&a.ciar_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_fact(&self, fact_id: &str) -> Result<bool> {
        Ok(self.tables.lock().working_memory.remove(fact_id).is_some())
    }

    async fn delete_facts_by_session(&self, session_id: &str) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.working_memory.len();
        tables
            .working_memory
            .retain(|_, fact| fact.session_id != session_id);
        Ok((before - tables.working_memory.len()) as u64)
    }

    async fn delete_facts_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock();
        let before = tables.working_memory.len();
        tables
            .working_memory
            .retain(|_, fact| fact.extracted_at >= cutoff);
        Ok((before - tables.working_memory.len()) as u64)
    }

    async fn count_facts(&self, session_id: Option<&str>) -> Result<u64> {
        let tables = self.tables.lock();
        Ok(tables
            .working_memory
            .values()
            .filter(|fact| session_id.is_none_or(|s| fact.session_id == s))
            .count() as u64)
    }

    async fn health_check(&self) -> AdapterHealth {
        let tables = self.tables.lock();
        AdapterHealth::healthy(self.name()).with_details(format!(
            "{} turns, {} facts",
            tables.active_context.len(),
            tables.working_memory.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fact(session: &str, ciar: f64) -> Fact {
        let mut fact = Fact::new(session, format!("fact scored {ciar}"));
        fact.certainty = 1.0;
        fact.impact = ciar;
        fact.recompute_score();
        fact
    }

    #[tokio::test]
    async fn fact_queries_apply_floor_and_order() {
        let store = InMemoryRelationalStore::new();
        store.insert_fact(&fact("s1", 0.9)).await.unwrap();
        store.insert_fact(&fact("s1", 0.7)).await.unwrap();
        store.insert_fact(&fact("s1", 0.3)).await.unwrap();
        store.insert_fact(&fact("s2", 0.95)).await.unwrap();

        let query = FactQuery::for_session("s1").with_min_ciar(0.6);
        let facts = store.query_facts(&query).await.unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts[0].ciar_score >= facts[1].ciar_score);

        let all = store
            .query_facts(&FactQuery::for_session("s1").include_low_ciar())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn bump_access_is_atomic_under_concurrency() {
        let store = std::sync::Arc::new(InMemoryRelationalStore::new());
        let f = fact("s1", 0.8);
        let fact_id = f.fact_id.clone();
        store.insert_fact(&f).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = std::sync::Arc::clone(&store);
            let fact_id = fact_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .bump_fact_access(&fact_id, Utc::now(), 0.05, 0.3)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get_fact(&fact_id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 32);
        assert!((stored.recency_boost - 1.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn expired_fact_sweep() {
        let store = InMemoryRelationalStore::new();
        let old = fact("s1", 0.8).with_extracted_at(Utc::now() - Duration::days(10));
        let fresh = fact("s1", 0.8);
        store.insert_fact(&old).await.unwrap();
        store.insert_fact(&fresh).await.unwrap();

        let removed = store
            .delete_facts_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_facts(Some("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn turn_queries_are_newest_first() {
        let store = InMemoryRelationalStore::new();
        let now = Utc::now();
        for i in 0..5 {
            let turn = Turn::new("s1", format!("t{i}"), crate::models::Role::User, "hi")
                .with_timestamp(now + Duration::seconds(i));
            store.insert_turn(&turn, now + Duration::hours(24)).await.unwrap();
        }

        let turns = store
            .query_turns(&TurnQuery::for_session("s1").with_limit(3))
            .await
            .unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].turn_id, "t4");
    }

    #[tokio::test]
    async fn delete_missing_fact_returns_false() {
        let store = InMemoryRelationalStore::new();
        assert!(!store.delete_fact("missing").await.unwrap());
    }
}
