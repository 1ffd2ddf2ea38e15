//! Qdrant vector-store adapter (REST API).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use strata_core::error::{Error, Result};
use strata_core::retry::{RetryConfig, RetryPolicy};
use strata_core::storage::{
    AdapterHealth, PayloadFilter, VectorHit, VectorPoint, VectorStore,
};

use crate::{status_error, transport_error};

const BACKEND: &str = "qdrant";

/// Qdrant REST adapter.
pub struct QdrantVectorStore {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl QdrantVectorStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryPolicy::with_config(RetryConfig::default()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let run = || async {
            let mut request = self.client.request(method.clone(), self.url(path));
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
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
            serde_json::from_str(&text)
                .map_err(|e| Error::Data(format!("{BACKEND} returned malformed JSON: {e}")))
        };
        self.retry.execute(run).await
    }

    fn filter_body(filter: Option<&PayloadFilter>) -> Option<Value> {
        let filter = filter.filter(|f| !f.is_empty())?;
        let must: Vec<Value> = filter
            .matches
            .iter()
            .map(|(field, value)| json!({"key": field, "match": {"value": value}}))
            .collect();
        Some(json!({"must": must}))
    }
}

fn parse_point(value: &Value) -> Option<VectorPoint> {
    Some(VectorPoint {
        id: point_id(value.get("id")?),
        vector: value
            .get("vector")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .unwrap_or_default(),
        payload: value.get("payload").cloned().unwrap_or(Value::Null),
    })
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn name(&self) -> &'static str {
        "qdrant_vector"
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        match self
            .request(reqwest::Method::GET, &format!("collections/{collection}"), None)
            .await
        {
            Ok(_) => return Ok(()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let body = json!({
            "vectors": {"size": dimension, "distance": "Cosine"}
        });
        self.request(
            reqwest::Method::PUT,
            &format!("collections/{collection}"),
            Some(&body),
        )
        .await?;
        info!("Created qdrant collection {collection} (dim {dimension}, Cosine)");
        Ok(())
    }

    async fn upsert_point(&self, collection: &str, point: VectorPoint) -> Result<()> {
        let body = json!({
            "points": [{
                "id": point.id,
                "vector": point.vector,
                "payload": point.payload,
            }]
        });
        self.request(
            reqwest::Method::PUT,
            &format!("collections/{collection}/points?wait=true"),
            Some(&body),
        )
        .await?;
        debug!("Upserted qdrant point {} into {collection}", point.id);
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let rendered: Vec<Value> = points
            .iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();
        self.request(
            reqwest::Method::PUT,
            &format!("collections/{collection}/points?wait=true"),
            Some(&json!({"points": rendered})),
        )
        .await?;
        debug!("Upserted {} qdrant points into {collection}", points.len());
        Ok(())
    }

    async fn retrieve_point(&self, collection: &str, id: &str) -> Result<Option<VectorPoint>> {
        match self
            .request(
                reqwest::Method::GET,
                &format!("collections/{collection}/points/{id}"),
                None,
            )
            .await
        {
            Ok(payload) => Ok(payload.get("result").and_then(parse_point)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter_body) = Self::filter_body(filter) {
            body["filter"] = filter_body;
        }

        let payload = self
            .request(
                reqwest::Method::POST,
                &format!("collections/{collection}/points/search"),
                Some(&body),
            )
            .await?;

        Ok(payload
            .get("result")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        Some(VectorHit {
                            id: point_id(hit.get("id")?),
                            score: hit.get("score").and_then(Value::as_f64).unwrap_or(0.0)
                                as f32,
                            payload: hit.get("payload").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorPoint>> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter_body) = Self::filter_body(filter) {
            body["filter"] = filter_body;
        }

        let payload = self
            .request(
                reqwest::Method::POST,
                &format!("collections/{collection}/points/scroll"),
                Some(&body),
            )
            .await?;

        Ok(payload
            .pointer("/result/points")
            .and_then(Value::as_array)
            .map(|points| points.iter().filter_map(parse_point).collect())
            .unwrap_or_default())
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let body = json!({"points": ids});
        self.request(
            reqwest::Method::POST,
            &format!("collections/{collection}/points/delete?wait=true"),
            Some(&body),
        )
        .await?;
        Ok(ids.len() as u64)
    }

    async fn count_points(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
    ) -> Result<u64> {
        let mut body = json!({"exact": true});
        if let Some(filter_body) = Self::filter_body(filter) {
            body["filter"] = filter_body;
        }
        let payload = self
            .request(
                reqwest::Method::POST,
                &format!("collections/{collection}/points/count"),
                Some(&body),
            )
            .await?;
        Ok(payload
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.request(reqwest::Method::GET, "collections", None).await {
            Ok(_) => AdapterHealth::healthy(self.name()),
            Err(e) => AdapterHealth::unhealthy(self.name(), e.to_string()),
        }
    }
}
