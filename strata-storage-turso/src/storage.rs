//! Turn and fact operations over the relational schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, params_from_iter, Row, Value};
use tracing::debug;

use strata_core::error::{Error, Result};
use strata_core::models::{Fact, FactCategory, FactType, Role, Turn, TurnQuery};
use strata_core::storage::{AdapterHealth, RelationalStore};

use crate::schema;
use crate::TursoRelationalStore;

const TURN_COLUMNS: &str = "session_id, turn_id, role, content, timestamp, metadata";
const FACT_COLUMNS: &str = "fact_id, session_id, content, ciar_score, certainty, impact, \
                            age_decay, recency_boost, source_uri, source_type, \
                            topic_segment_id, topic_label, fact_type, fact_category, \
                            metadata, extracted_at, last_accessed, access_count";

fn ts_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Data(format!("invalid {field} timestamp: {ms}")))
}

macro_rules! read_column {
    ($row:expr, $idx:expr, $ty:ty, $field:expr) => {
        $row.get::<$ty>($idx)
            .map_err(|e| Error::Data(format!("failed to read {}: {e}", $field)))?
    };
}

fn row_to_turn(row: &Row) -> Result<Turn> {
    let session_id = read_column!(row, 0, String, "session_id");
    let turn_id = read_column!(row, 1, String, "turn_id");
    let role = read_column!(row, 2, String, "role");
    let content = read_column!(row, 3, String, "content");
    let timestamp = read_column!(row, 4, i64, "timestamp");
    let metadata_json = read_column!(row, 5, String, "metadata");

    Ok(Turn {
        turn_id,
        session_id,
        role: role.parse::<Role>()?,
        content,
        timestamp: from_millis(timestamp, "timestamp")?,
        metadata: serde_json::from_str(&metadata_json)?,
    })
}

fn row_to_fact(row: &Row) -> Result<Fact> {
    let fact_type = read_column!(row, 12, Option<String>, "fact_type");
    let fact_category = read_column!(row, 13, Option<String>, "fact_category");
    let metadata_json = read_column!(row, 14, String, "metadata");
    let extracted_at = read_column!(row, 15, i64, "extracted_at");
    let last_accessed = read_column!(row, 16, i64, "last_accessed");
    let access_count = read_column!(row, 17, i64, "access_count");

    Ok(Fact {
        fact_id: read_column!(row, 0, String, "fact_id"),
        session_id: read_column!(row, 1, String, "session_id"),
        content: read_column!(row, 2, String, "content"),
        ciar_score: read_column!(row, 3, f64, "ciar_score"),
        certainty: read_column!(row, 4, f64, "certainty"),
        impact: read_column!(row, 5, f64, "impact"),
        age_decay: read_column!(row, 6, f64, "age_decay"),
        recency_boost: read_column!(row, 7, f64, "recency_boost"),
        source_uri: read_column!(row, 8, Option<String>, "source_uri"),
        source_type: read_column!(row, 9, String, "source_type"),
        topic_segment_id: read_column!(row, 10, Option<String>, "topic_segment_id"),
        topic_label: read_column!(row, 11, Option<String>, "topic_label"),
        fact_type: fact_type
            .map(|t| t.parse::<FactType>())
            .transpose()?,
        fact_category: fact_category
            .map(|c| c.parse::<FactCategory>())
            .transpose()?,
        metadata: serde_json::from_str(&metadata_json)?,
        extracted_at: from_millis(extracted_at, "extracted_at")?,
        last_accessed: from_millis(last_accessed, "last_accessed")?,
        access_count: access_count.max(0) as u64,
    })
}

/// Remove FTS5 operator characters from user text before a MATCH query.
fn sanitize_match_query(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect()
}

#[async_trait]
impl RelationalStore for TursoRelationalStore {
    fn name(&self) -> &'static str {
        "turso_relational"
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.initialize().await
    }

    async fn verify_fulltext_index(&self) -> Result<()> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(schema::FULLTEXT_INDEX_PROBE, ())
            .await
            .map_err(|e| Error::Query(format!("full-text index probe failed: {e}")))?;
        let present = rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("full-text index probe failed: {e}")))?
            .is_some();
        if present {
            Ok(())
        } else {
            Err(Error::Config(
                "full-text index on working_memory.content is missing; run initialize()"
                    .to_string(),
            ))
        }
    }

    async fn insert_turn(&self, turn: &Turn, ttl_expires_at: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        let metadata_json = serde_json::to_string(&turn.metadata)?;

        conn.execute(
            "INSERT INTO active_context \
             (session_id, turn_id, role, content, timestamp, tier, metadata, ttl_expires_at) \
             VALUES (?, ?, ?, ?, ?, 'L1', ?, ?)",
            params![
                turn.session_id.clone(),
                turn.turn_id.clone(),
                turn.role.as_str(),
                turn.content.clone(),
                ts_millis(turn.timestamp),
                metadata_json,
                ts_millis(ttl_expires_at),
            ],
        )
        .await
        .map_err(|e| Error::Query(format!("failed to insert turn: {e}")))?;
        Ok(())
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {TURN_COLUMNS} FROM active_context WHERE turn_id = ? AND tier = 'L1' LIMIT 1"
        );
        let mut rows = conn
            .query(&sql, params![turn_id])
            .await
            .map_err(|e| Error::Query(format!("failed to query turn: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch turn row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_turn(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_turns(&self, query: &TurnQuery) -> Result<Vec<Turn>> {
        let conn = self.connection()?;
        let mut sql = format!(
            "SELECT {TURN_COLUMNS} FROM active_context WHERE tier = 'L1'"
        );
        let mut params_vec: Vec<Value> = Vec::new();

        if let Some(session_id) = &query.session_id {
            sql.push_str(" AND session_id = ?");
            params_vec.push(Value::Text(session_id.clone()));
        }
        if let Some(role) = query.role {
            sql.push_str(" AND role = ?");
            params_vec.push(Value::Text(role.as_str().to_string()));
        }
        if let Some(after) = query.after {
            sql.push_str(" AND timestamp >= ?");
            params_vec.push(Value::Integer(ts_millis(after)));
        }
        if let Some(before) = query.before {
            sql.push_str(" AND timestamp <= ?");
            params_vec.push(Value::Integer(ts_millis(before)));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            params_vec.push(Value::Integer(limit as i64));
        }

        let mut rows = conn
            .query(&sql, params_from_iter(params_vec))
            .await
            .map_err(|e| Error::Query(format!("failed to query turns: {e}")))?;

        let mut turns = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch turn row: {e}")))?
        {
            turns.push(row_to_turn(&row)?);
        }
        debug!("Query returned {} turns", turns.len());
        Ok(turns)
    }

    async fn delete_turns_by_session(&self, session_id: &str) -> Result<u64> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM active_context WHERE session_id = ? AND tier = 'L1'",
            params![session_id],
        )
        .await
        .map_err(|e| Error::Query(format!("failed to delete turns: {e}")))
    }

    async fn insert_fact(&self, fact: &Fact) -> Result<()> {
        let conn = self.connection()?;
        let metadata_json = serde_json::to_string(&fact.metadata)?;
        let sql = format!(
            "INSERT OR REPLACE INTO working_memory ({FACT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );

        conn.execute(
            &sql,
            params![
                fact.fact_id.clone(),
                fact.session_id.clone(),
                fact.content.clone(),
                fact.ciar_score,
                fact.certainty,
                fact.impact,
                fact.age_decay,
                fact.recency_boost,
                fact.source_uri.clone(),
                fact.source_type.clone(),
                fact.topic_segment_id.clone(),
                fact.topic_label.clone(),
                fact.fact_type.map(|t| t.as_str().to_string()),
                fact.fact_category.map(|c| c.as_str().to_string()),
                metadata_json,
                ts_millis(fact.extracted_at),
                ts_millis(fact.last_accessed),
                fact.access_count as i64,
            ],
        )
        .await
        .map_err(|e| Error::Query(format!("failed to insert fact: {e}")))?;
        Ok(())
    }

    async fn insert_facts(&self, facts: &[Fact]) -> Result<()> {
        for fact in facts {
            self.insert_fact(fact).await?;
        }
        Ok(())
    }

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>> {
        let conn = self.connection()?;
        let sql = format!("SELECT {FACT_COLUMNS} FROM working_memory WHERE fact_id = ?");
        let mut rows = conn
            .query(&sql, params![fact_id])
            .await
            .map_err(|e| Error::Query(format!("failed to query fact: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch fact row: {e}")))?
        {
            Some(row) => Ok(Some(row_to_fact(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_fact(&self, fact: &Fact) -> Result<bool> {
        let conn = self.connection()?;
        let metadata_json = serde_json::to_string(&fact.metadata)?;
        let affected = conn
            .execute(
                "UPDATE working_memory SET content = ?, ciar_score = ?, certainty = ?, \
                 impact = ?, age_decay = ?, recency_boost = ?, metadata = ?, \
                 last_accessed = ?, access_count = ? WHERE fact_id = ?",
                params![
                    fact.content.clone(),
                    fact.ciar_score,
                    fact.certainty,
                    fact.impact,
                    fact.age_decay,
                    fact.recency_boost,
                    metadata_json,
                    ts_millis(fact.last_accessed),
                    fact.access_count as i64,
                    fact.fact_id.clone(),
                ],
            )
            .await
            .map_err(|e| Error::Query(format!("failed to update fact: {e}")))?;
        Ok(affected > 0)
    }

    async fn bump_fact_access(
        &self,
        fact_id: &str,
        accessed_at: DateTime<Utc>,
        alpha: f64,
        max_boost: f64,
    ) -> Result<bool> {
        let conn = self.connection()?;
        // Single statement so concurrent bumps never lose counts
        let affected = conn
            .execute(
                "UPDATE working_memory SET \
                 access_count = access_count + 1, \
                 last_accessed = ?1, \
                 recency_boost = min(1.0 + ?2 * (access_count + 1), 1.0 + ?3), \
                 ciar_score = round((certainty * impact) * age_decay * \
                                    min(1.0 + ?2 * (access_count + 1), 1.0 + ?3), 4) \
                 WHERE fact_id = ?4",
                params![ts_millis(accessed_at), alpha, max_boost, fact_id],
            )
            .await
            .map_err(|e| Error::Query(format!("failed to bump fact access: {e}")))?;
        Ok(affected > 0)
    }

    async fn query_facts(&self, query: &strata_core::models::FactQuery) -> Result<Vec<Fact>> {
        let conn = self.connection()?;
        let mut sql = format!("SELECT {FACT_COLUMNS} FROM working_memory WHERE 1=1");
        let mut params_vec: Vec<Value> = Vec::new();

        if let Some(session_id) = &query.session_id {
            sql.push_str(" AND session_id = ?");
            params_vec.push(Value::Text(session_id.clone()));
        }
        if !query.include_low_ciar {
            if let Some(min_ciar) = query.min_ciar {
                sql.push_str(" AND ciar_score >= ?");
                params_vec.push(Value::Real(min_ciar));
            }
        }
        if !query.fact_types.is_empty() {
            let placeholders = vec!["?"; query.fact_types.len()].join(", ");
            sql.push_str(&format!(" AND fact_type IN ({placeholders})"));
            for fact_type in &query.fact_types {
                params_vec.push(Value::Text(fact_type.as_str().to_string()));
            }
        }
        if !query.fact_categories.is_empty() {
            let placeholders = vec!["?"; query.fact_categories.len()].join(", ");
            sql.push_str(&format!(" AND fact_category IN ({placeholders})"));
            for category in &query.fact_categories {
                params_vec.push(Value::Text(category.as_str().to_string()));
            }
        }
        if let Some(after) = query.extracted_after {
            sql.push_str(" AND extracted_at >= ?");
            params_vec.push(Value::Integer(ts_millis(after)));
        }
        if let Some(before) = query.extracted_before {
            sql.push_str(" AND extracted_at <= ?");
            params_vec.push(Value::Integer(ts_millis(before)));
        }

        sql.push_str(" ORDER BY ciar_score DESC, last_accessed DESC LIMIT ?");
        params_vec.push(Value::Integer(query.limit as i64));

        let mut rows = conn
            .query(&sql, params_from_iter(params_vec))
            .await
            .map_err(|e| Error::Query(format!("failed to query facts: {e}")))?;

        let mut facts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch fact row: {e}")))?
        {
            facts.push(row_to_fact(&row)?);
        }
        debug!("Query returned {} facts", facts.len());
        Ok(facts)
    }

    async fn search_facts_text(
        &self,
        session_id: &str,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Fact>> {
        let conn = self.connection()?;
        let sanitized = sanitize_match_query(text);
        if sanitized.trim().is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM working_memory w \
             JOIN working_memory_fts ON w.fact_id = working_memory_fts.fact_id \
             WHERE working_memory_fts MATCH ? AND w.session_id = ? \
             ORDER BY rank LIMIT ?",
            FACT_COLUMNS
                .split(", ")
                .map(|col| format!("w.{col}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut rows = conn
            .query(&sql, params![sanitized, session_id, limit as i64])
            .await
            .map_err(|e| Error::Query(format!("full-text search failed: {e}")))?;

        let mut facts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch search row: {e}")))?
        {
            facts.push(row_to_fact(&row)?);
        }
        Ok(facts)
    }

    async fn delete_fact(&self, fact_id: &str) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute("DELETE FROM working_memory WHERE fact_id = ?", params![fact_id])
            .await
            .map_err(|e| Error::Query(format!("failed to delete fact: {e}")))?;
        Ok(affected > 0)
    }

    async fn delete_facts_by_session(&self, session_id: &str) -> Result<u64> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM working_memory WHERE session_id = ?",
            params![session_id],
        )
        .await
        .map_err(|e| Error::Query(format!("failed to delete facts: {e}")))
    }

    async fn delete_facts_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM working_memory WHERE extracted_at < ?",
            params![ts_millis(cutoff)],
        )
        .await
        .map_err(|e| Error::Query(format!("failed to sweep facts: {e}")))
    }

    async fn count_facts(&self, session_id: Option<&str>) -> Result<u64> {
        let conn = self.connection()?;
        let (sql, params_vec) = match session_id {
            Some(session) => (
                "SELECT COUNT(*) FROM working_memory WHERE session_id = ?",
                vec![Value::Text(session.to_string())],
            ),
            None => ("SELECT COUNT(*) FROM working_memory", Vec::new()),
        };

        let mut rows = conn
            .query(sql, params_from_iter(params_vec))
            .await
            .map_err(|e| Error::Query(format!("failed to count facts: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| Error::Query(format!("failed to fetch count: {e}")))?
            .ok_or_else(|| Error::Query("count query returned no rows".to_string()))?;
        let count: i64 = read_column!(row, 0, i64, "count");
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> AdapterHealth {
        let probe = async {
            let conn = self.connection()?;
            conn.query("SELECT 1", ())
                .await
                .map_err(|e| Error::Connection(format!("health probe failed: {e}")))?;
            Ok::<(), Error>(())
        };
        match probe.await {
            Ok(()) => AdapterHealth::healthy(self.name()),
            Err(e) => AdapterHealth::unhealthy(self.name(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::models::FactQuery;
    use tempfile::TempDir;

    async fn store() -> (TursoRelationalStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("file:{}", dir.path().join("test.db").display());
        let store = TursoRelationalStore::connect(&url, "").await.unwrap();
        store.initialize().await.unwrap();
        (store, dir)
    }

    fn fact(session: &str, content: &str, score_components: (f64, f64)) -> Fact {
        Fact::new(session, content).with_components(score_components.0, score_components.1)
    }

    #[tokio::test]
    async fn schema_passes_fulltext_verification() {
        let (store, _dir) = store().await;
        store.verify_fulltext_index().await.unwrap();
    }

    #[tokio::test]
    async fn turn_round_trip_preserves_fields() {
        let (store, _dir) = store().await;
        let mut metadata = serde_json::Map::new();
        metadata.insert("lane".to_string(), serde_json::json!("rotterdam"));
        let turn = Turn::new("s1", "t1", Role::Assistant, "Booked the slot")
            .with_metadata(metadata);

        store
            .insert_turn(&turn, Utc::now() + chrono::Duration::hours(24))
            .await
            .unwrap();

        let fetched = store.get_turn("t1").await.unwrap().unwrap();
        assert_eq!(fetched.session_id, "s1");
        assert_eq!(fetched.role, Role::Assistant);
        assert_eq!(fetched.content, "Booked the slot");
        assert_eq!(fetched.metadata["lane"], serde_json::json!("rotterdam"));
        // Millisecond precision survives the round trip
        assert_eq!(
            fetched.timestamp.timestamp_millis(),
            turn.timestamp.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn turns_query_newest_first_with_limit() {
        let (store, _dir) = store().await;
        let base = Utc::now();
        for i in 0..6 {
            let turn = Turn::new("s1", format!("t{i}"), Role::User, format!("m{i}"))
                .with_timestamp(base + chrono::Duration::milliseconds(i));
            store
                .insert_turn(&turn, base + chrono::Duration::hours(24))
                .await
                .unwrap();
        }

        let turns = store
            .query_turns(&TurnQuery::for_session("s1").with_limit(3))
            .await
            .unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].turn_id, "t5");
    }

    #[tokio::test]
    async fn fact_round_trip_and_ordering() {
        let (store, _dir) = store().await;
        store
            .insert_fact(&fact("s1", "high value fact", (1.0, 0.9)))
            .await
            .unwrap();
        store
            .insert_fact(&fact("s1", "medium value fact", (1.0, 0.7)))
            .await
            .unwrap();
        store
            .insert_fact(&fact("s2", "other session", (1.0, 0.9)))
            .await
            .unwrap();

        let query = FactQuery::for_session("s1").with_min_ciar(0.6);
        let facts = store.query_facts(&query).await.unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts[0].ciar_score >= facts[1].ciar_score);
        assert_eq!(facts[0].content, "high value fact");
    }

    #[tokio::test]
    async fn bump_access_recomputes_score_in_place() {
        let (store, _dir) = store().await;
        let f = fact("s1", "bump me", (1.0, 0.75));
        let fact_id = f.fact_id.clone();
        store.insert_fact(&f).await.unwrap();

        assert!(store
            .bump_fact_access(&fact_id, Utc::now(), 0.05, 0.3)
            .await
            .unwrap());

        let stored = store.get_fact(&fact_id).await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert!((stored.recency_boost - 1.05).abs() < 1e-9);
        assert!((stored.ciar_score - stored.expected_score()).abs() <= 0.01);

        assert!(!store
            .bump_fact_access("missing", Utc::now(), 0.05, 0.3)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn fulltext_search_matches_stems() {
        let (store, _dir) = store().await;
        store
            .insert_fact(&fact("s1", "Customer prefers rail shipments", (1.0, 0.9)))
            .await
            .unwrap();
        store
            .insert_fact(&fact("s1", "Budget capped at forty thousand", (1.0, 0.9)))
            .await
            .unwrap();

        let hits = store
            .search_facts_text("s1", "shipment", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("rail"));

        // Other sessions stay invisible
        let none = store.search_facts_text("s2", "shipment", 10).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn expired_fact_sweep_deletes_old_rows() {
        let (store, _dir) = store().await;
        let old = fact("s1", "ancient fact", (1.0, 0.9))
            .with_extracted_at(Utc::now() - chrono::Duration::days(30));
        store.insert_fact(&old).await.unwrap();
        store.insert_fact(&fact("s1", "fresh fact", (1.0, 0.9))).await.unwrap();

        let removed = store
            .delete_facts_older_than(Utc::now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_facts(Some("s1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_missing_rows_return_false() {
        let (store, _dir) = store().await;
        assert!(!store.delete_fact("missing").await.unwrap());
        assert_eq!(store.delete_turns_by_session("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_non_allowlisted_urls() {
        let result = TursoRelationalStore::connect("https://example.com", "").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
