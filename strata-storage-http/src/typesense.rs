//! Typesense full-text adapter (REST API).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use strata_core::error::{Error, Result};
use strata_core::retry::{RetryConfig, RetryPolicy};
use strata_core::storage::{
    AdapterHealth, FullTextHit, FullTextQuery, FullTextSchema, FullTextStore,
};

use crate::{status_error, transport_error};

const BACKEND: &str = "typesense";

/// Typesense REST adapter.
pub struct TypesenseFullTextStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl TypesenseFullTextStore {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
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
            let mut request = self
                .client
                .request(method.clone(), self.url(path))
                .header("X-TYPESENSE-API-KEY", &self.api_key);
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
}

/// Infer a Typesense field type for a facet field in the knowledge schema.
fn facet_field_type(field: &str) -> Value {
    match field {
        "confidence_score" | "usefulness_score" => json!("float"),
        "access_count" | "distilled_at" | "validation_count" | "episode_count" => json!("int64"),
        "tags" => json!("string[]"),
        _ => json!("string"),
    }
}

#[async_trait]
impl FullTextStore for TypesenseFullTextStore {
    fn name(&self) -> &'static str {
        "typesense_fulltext"
    }

    async fn ensure_collection(&self, schema: &FullTextSchema) -> Result<()> {
        match self
            .request(
                reqwest::Method::GET,
                &format!("collections/{}", schema.name),
                None,
            )
            .await
        {
            Ok(_) => return Ok(()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut fields: Vec<Value> = schema
            .query_fields
            .iter()
            .map(|field| json!({"name": field, "type": "string"}))
            .collect();
        for field in &schema.facet_fields {
            fields.push(json!({
                "name": field,
                "type": facet_field_type(field),
                "facet": true,
                "optional": true,
            }));
        }

        let mut body = json!({"name": schema.name, "fields": fields});
        if let Some(sort_field) = &schema.default_sort_field {
            body["default_sorting_field"] = json!(sort_field);
        }

        self.request(reqwest::Method::POST, "collections", Some(&body))
            .await?;
        info!("Created typesense collection {}", schema.name);
        Ok(())
    }

    async fn index_document(&self, collection: &str, document: &Value) -> Result<String> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Data("document requires an 'id' field".to_string()))?
            .to_string();

        self.request(
            reqwest::Method::POST,
            &format!("collections/{collection}/documents?action=upsert"),
            Some(document),
        )
        .await?;
        debug!("Indexed document {id} into {collection}");
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        match self
            .request(
                reqwest::Method::GET,
                &format!("collections/{collection}/documents/{id}"),
                None,
            )
            .await
        {
            Ok(document) => Ok(Some(document)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search(&self, collection: &str, query: &FullTextQuery) -> Result<Vec<FullTextHit>> {
        let mut path = format!(
            "collections/{collection}/documents/search?q={}&query_by={}&per_page={}",
            urlencode(&query.q),
            urlencode(&query.query_by.join(",")),
            query.limit
        );
        if let Some(filter_by) = &query.filter_by {
            path.push_str(&format!("&filter_by={}", urlencode(filter_by)));
        }
        if let Some(sort_by) = &query.sort_by {
            path.push_str(&format!("&sort_by={}", urlencode(sort_by)));
        }

        let payload = self.request(reqwest::Method::GET, &path, None).await?;

        Ok(payload
            .get("hits")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| {
                        // Typesense reports an opaque text_match rank; the
                        // synthesizer substitutes positional scores for
                        // backends without a normalized relevance score.
                        Some(FullTextHit {
                            document: hit.get("document")?.clone(),
                            score: 0.0,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_document(&self, collection: &str, id: &str, patch: &Value) -> Result<()> {
        self.request(
            reqwest::Method::PATCH,
            &format!("collections/{collection}/documents/{id}"),
            Some(patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        match self
            .request(
                reqwest::Method::DELETE,
                &format!("collections/{collection}/documents/{id}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_by_filter(&self, collection: &str, filter_by: &str) -> Result<u64> {
        let payload = self
            .request(
                reqwest::Method::DELETE,
                &format!(
                    "collections/{collection}/documents?filter_by={}",
                    urlencode(filter_by)
                ),
                None,
            )
            .await?;
        Ok(payload
            .get("num_deleted")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn count_documents(&self, collection: &str, filter_by: Option<&str>) -> Result<u64> {
        let mut path = format!(
            "collections/{collection}/documents/search?q=*&query_by=title&per_page=0"
        );
        if let Some(filter_by) = filter_by {
            path.push_str(&format!("&filter_by={}", urlencode(filter_by)));
        }
        let payload = self.request(reqwest::Method::GET, &path, None).await?;
        Ok(payload.get("found").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.request(reqwest::Method::GET, "health", None).await {
            Ok(_) => AdapterHealth::healthy(self.name()),
            Err(e) => AdapterHealth::unhealthy(self.name(), e.to_string()),
        }
    }
}

/// Minimal percent-encoding for query-string values.
fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_filter_syntax() {
        assert_eq!(urlencode("a b"), "a%20b");
        assert_eq!(
            urlencode("knowledge_type:='rule'"),
            "knowledge_type%3A%3D%27rule%27"
        );
    }

    #[test]
    fn facet_types_cover_numeric_fields() {
        assert_eq!(facet_field_type("usefulness_score"), json!("float"));
        assert_eq!(facet_field_type("access_count"), json!("int64"));
        assert_eq!(facet_field_type("tags"), json!("string[]"));
        assert_eq!(facet_field_type("category"), json!("string"));
    }
}
