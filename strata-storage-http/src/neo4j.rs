//! Neo4j graph adapter over the HTTP transactional Cypher endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;

use strata_core::error::{Error, Result};
use strata_core::models::{EntityRef, MentionEdge};
use strata_core::retry::{RetryConfig, RetryPolicy};
use strata_core::storage::{AdapterHealth, GraphEpisode, GraphStore};

use crate::{status_error, transport_error};

const BACKEND: &str = "neo4j";

/// Neo4j HTTP adapter.
pub struct Neo4jGraphStore {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    retry: RetryPolicy,
}

impl Neo4jGraphStore {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            user: user.into(),
            password: password.into(),
            database: "neo4j".to_string(),
            retry: RetryPolicy::with_config(RetryConfig::default()),
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Run one Cypher statement in an auto-commit transaction and return
    /// its rows.
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>> {
        let url = format!(
            "{}/db/{}/tx/commit",
            self.base_url.trim_end_matches('/'),
            self.database
        );
        let body = json!({
            "statements": [{"statement": statement, "parameters": parameters}]
        });

        let run = || async {
            let response = self
                .client
                .post(&url)
                .basic_auth(&self.user, Some(&self.password))
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(BACKEND, &e))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| transport_error(BACKEND, &e))?;
            if !status.is_success() {
                return Err(status_error(BACKEND, status, &text));
            }
            let payload: Value = serde_json::from_str(&text)
                .map_err(|e| Error::Data(format!("{BACKEND} returned malformed JSON: {e}")))?;

            if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
                if let Some(first) = errors.first() {
                    return Err(Error::Query(format!("{BACKEND} rejected query: {first}")));
                }
            }

            let rows = payload
                .pointer("/results/0/data")
                .and_then(Value::as_array)
                .map(|data| {
                    data.iter()
                        .filter_map(|entry| {
                            entry
                                .get("row")
                                .and_then(Value::as_array)
                                .map(Clone::clone)
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(rows)
        };
        self.retry.execute(run).await
    }
}

fn iso(ts: DateTime<Utc>) -> Value {
    json!(ts.to_rfc3339())
}

fn opt_iso(ts: Option<DateTime<Utc>>) -> Value {
    ts.map_or(Value::Null, |t| json!(t.to_rfc3339()))
}

fn parse_iso(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| Error::Data(format!("invalid {field} in graph node: {value}")))
}

fn episode_properties(episode: &GraphEpisode) -> Value {
    json!({
        "episodeId": episode.episode_id,
        "sessionId": episode.session_id,
        "summary": episode.summary,
        "narrative": episode.narrative,
        "factCount": episode.fact_count,
        "timeWindowStart": iso(episode.time_window_start),
        "timeWindowEnd": iso(episode.time_window_end),
        "durationSeconds": episode.duration_seconds,
        "factValidFrom": iso(episode.fact_valid_from),
        "factValidTo": opt_iso(episode.fact_valid_to),
        "sourceObservationTimestamp": iso(episode.source_observation_timestamp),
        "importanceScore": episode.importance_score,
        "vectorId": episode.vector_id,
        "consolidatedAt": iso(episode.consolidated_at),
        "consolidationMethod": episode.consolidation_method,
    })
}

fn node_to_episode(props: &Value) -> Result<GraphEpisode> {
    let str_field = |key: &str| {
        props
            .get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_default()
    };
    let episode_id = props
        .get("episodeId")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Data("graph node missing episodeId".to_string()))?
        .to_string();

    Ok(GraphEpisode {
        episode_id,
        session_id: str_field("sessionId"),
        summary: str_field("summary"),
        narrative: str_field("narrative"),
        fact_count: props
            .get("factCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        time_window_start: parse_iso(
            props.get("timeWindowStart").unwrap_or(&Value::Null),
            "timeWindowStart",
        )?,
        time_window_end: parse_iso(
            props.get("timeWindowEnd").unwrap_or(&Value::Null),
            "timeWindowEnd",
        )?,
        duration_seconds: props
            .get("durationSeconds")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        fact_valid_from: parse_iso(
            props.get("factValidFrom").unwrap_or(&Value::Null),
            "factValidFrom",
        )?,
        fact_valid_to: props
            .get("factValidTo")
            .filter(|v| !v.is_null())
            .map(|v| parse_iso(v, "factValidTo"))
            .transpose()?,
        source_observation_timestamp: parse_iso(
            props
                .get("sourceObservationTimestamp")
                .unwrap_or(&Value::Null),
            "sourceObservationTimestamp",
        )?,
        importance_score: props
            .get("importanceScore")
            .and_then(Value::as_f64)
            .unwrap_or(0.5),
        vector_id: props
            .get("vectorId")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        consolidated_at: parse_iso(
            props.get("consolidatedAt").unwrap_or(&Value::Null),
            "consolidatedAt",
        )
        .unwrap_or_else(|_| Utc::now()),
        consolidation_method: str_field("consolidationMethod"),
    })
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    fn name(&self) -> &'static str {
        "neo4j_graph"
    }

    async fn upsert_episode_node(&self, episode: &GraphEpisode) -> Result<String> {
        self.run(
            "MERGE (e:Episode {episodeId: $episodeId}) SET e = $props RETURN e.episodeId",
            json!({
                "episodeId": episode.episode_id,
                "props": episode_properties(episode),
            }),
        )
        .await?;
        debug!("Upserted graph node for episode {}", episode.episode_id);
        Ok(episode.episode_id.clone())
    }

    async fn upsert_entity_mention(
        &self,
        episode_id: &str,
        entity: &EntityRef,
        edge: &MentionEdge,
    ) -> Result<()> {
        self.run(
            "MATCH (e:Episode {episodeId: $episodeId}) \
             MERGE (n:Entity {entityId: $entityId}) \
             SET n.name = $name, n.type = $entityType, n.properties = $properties \
             MERGE (e)-[r:MENTIONS]->(n) \
             SET r.factValidFrom = $factValidFrom, r.factValidTo = $factValidTo, \
                 r.sourceObservationTimestamp = $sourceObservationTimestamp, \
                 r.confidence = $confidence",
            json!({
                "episodeId": episode_id,
                "entityId": entity.entity_id,
                "name": entity.name,
                "entityType": entity.entity_type,
                "properties": serde_json::to_string(&entity.properties)?,
                "factValidFrom": iso(edge.fact_valid_from),
                "factValidTo": opt_iso(edge.fact_valid_to),
                "sourceObservationTimestamp": iso(edge.source_observation_timestamp),
                "confidence": edge.confidence,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_episode_vector_id(&self, episode_id: &str, vector_id: &str) -> Result<()> {
        self.run(
            "MATCH (e:Episode {episodeId: $episodeId}) SET e.vectorId = $vectorId",
            json!({"episodeId": episode_id, "vectorId": vector_id}),
        )
        .await?;
        Ok(())
    }

    async fn get_episode_node(&self, episode_id: &str) -> Result<Option<GraphEpisode>> {
        let rows = self
            .run(
                "MATCH (e:Episode {episodeId: $episodeId}) RETURN properties(e)",
                json!({"episodeId": episode_id}),
            )
            .await?;
        match rows.first().and_then(|row| row.first()) {
            Some(props) => Ok(Some(node_to_episode(props)?)),
            None => Ok(None),
        }
    }

    async fn episode_entities(&self, episode_id: &str) -> Result<Vec<EntityRef>> {
        let rows = self
            .run(
                "MATCH (e:Episode {episodeId: $episodeId})-[r:MENTIONS]->(n:Entity) \
                 RETURN properties(n), r.confidence",
                json!({"episodeId": episode_id}),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let props = row.first()?;
                let confidence = row.get(1).and_then(Value::as_f64).unwrap_or(0.8);
                Some(EntityRef {
                    entity_id: props.get("entityId")?.as_str()?.to_string(),
                    name: props
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    entity_type: props
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    confidence,
                    properties: props
                        .get("properties")
                        .and_then(Value::as_str)
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn episodes_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<GraphEpisode>> {
        let rows = self
            .run(
                "MATCH (e:Episode {sessionId: $sessionId}) RETURN properties(e) \
                 ORDER BY e.timeWindowEnd DESC LIMIT $limit",
                json!({"sessionId": session_id, "limit": limit.min(i64::MAX as usize) as i64}),
            )
            .await?;
        rows.iter()
            .filter_map(|row| row.first())
            .map(node_to_episode)
            .collect()
    }

    async fn query_temporal(
        &self,
        query_time: DateTime<Utc>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GraphEpisode>> {
        // RFC3339 strings in UTC compare lexically in timestamp order
        let (statement, parameters) = match session_id {
            Some(session) => (
                "MATCH (e:Episode {sessionId: $sessionId}) \
                 WHERE e.factValidFrom <= $queryTime \
                   AND (e.factValidTo IS NULL OR e.factValidTo > $queryTime) \
                 RETURN properties(e) ORDER BY e.importanceScore DESC LIMIT $limit",
                json!({"sessionId": session, "queryTime": iso(query_time), "limit": limit as i64}),
            ),
            None => (
                "MATCH (e:Episode) \
                 WHERE e.factValidFrom <= $queryTime \
                   AND (e.factValidTo IS NULL OR e.factValidTo > $queryTime) \
                 RETURN properties(e) ORDER BY e.importanceScore DESC LIMIT $limit",
                json!({"queryTime": iso(query_time), "limit": limit as i64}),
            ),
        };

        let rows = self.run(statement, parameters).await?;
        rows.iter()
            .filter_map(|row| row.first())
            .map(node_to_episode)
            .collect()
    }

    async fn all_episode_ids(&self) -> Result<Vec<String>> {
        let rows = self
            .run("MATCH (e:Episode) RETURN e.episodeId", json!({}))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first())
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect())
    }

    async fn episodes_missing_vector_id(&self) -> Result<Vec<String>> {
        let rows = self
            .run(
                "MATCH (e:Episode) WHERE e.vectorId IS NULL RETURN e.episodeId",
                json!({}),
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first())
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect())
    }

    async fn delete_episode(&self, episode_id: &str) -> Result<bool> {
        let rows = self
            .run(
                "MATCH (e:Episode {episodeId: $episodeId}) \
                 WITH e, count(e) AS found DETACH DELETE e RETURN found",
                json!({"episodeId": episode_id}),
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_u64)
            .unwrap_or(0)
            > 0)
    }

    async fn execute_parameterized_query(
        &self,
        query: &str,
        params: &Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let rows = self.run(query, Value::Object(params.clone())).await?;
        Ok(rows.into_iter().map(Value::Array).collect())
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.run("RETURN 1", json!({})).await {
            Ok(_) => AdapterHealth::healthy(self.name()),
            Err(e) => AdapterHealth::unhealthy(self.name(), e.to_string()),
        }
    }
}
