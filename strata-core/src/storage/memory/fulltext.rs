use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::filter::FilterExpr;
use crate::storage::{AdapterHealth, FullTextHit, FullTextQuery, FullTextSchema, FullTextStore};

#[derive(Debug, Default)]
struct Collection {
    schema: Option<FullTextSchema>,
    documents: HashMap<String, Value>,
}

/// In-memory full-text store with token-overlap scoring and faceted
/// filter expressions.
#[derive(Debug, Default)]
pub struct InMemoryFullTextStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryFullTextStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Fraction of query tokens found in the document's query fields.
fn score_document(document: &Value, query_tokens: &[String], query_by: &[String]) -> f32 {
    if query_tokens.is_empty() {
        return 1.0;
    }
    let mut haystack = String::new();
    for field in query_by {
        if let Some(text) = document.get(field).and_then(Value::as_str) {
            haystack.push_str(text);
            haystack.push(' ');
        }
    }
    let doc_tokens = tokenize(&haystack);
    let matched = query_tokens
        .iter()
        .filter(|token| doc_tokens.contains(token))
        .count();
    matched as f32 / query_tokens.len() as f32
}

fn sort_key(document: &Value, field: &str) -> f64 {
    document.get(field).and_then(Value::as_f64).unwrap_or(0.0)
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[async_trait]
impl FullTextStore for InMemoryFullTextStore {
    fn name(&self) -> &'static str {
        "memory_fulltext"
    }

    async fn ensure_collection(&self, schema: &FullTextSchema) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections.entry(schema.name.clone()).or_default();
        if collection.schema.is_none() {
            collection.schema = Some(schema.clone());
        }
        Ok(())
    }

    async fn index_document(&self, collection: &str, document: &Value) -> Result<String> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Data("document requires an 'id' field".to_string()))?
            .to_string();
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        col.documents.insert(id.clone(), document.clone());
        Ok(id)
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|col| col.documents.get(id))
            .cloned())
    }

    async fn search(&self, collection: &str, query: &FullTextQuery) -> Result<Vec<FullTextHit>> {
        let filter = query
            .filter_by
            .as_deref()
            .map(FilterExpr::parse)
            .transpose()?;

        let collections = self.collections.read();
        let col = collections
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;

        let query_tokens = tokenize(&query.q);
        let is_wildcard = query.q.trim().is_empty() || query.q.trim() == "*";

        let mut hits: Vec<FullTextHit> = col
            .documents
            .values()
            .filter(|doc| filter.as_ref().is_none_or(|f| f.matches(doc)))
            .filter_map(|doc| {
                let score = if is_wildcard {
                    1.0
                } else {
                    score_document(doc, &query_tokens, &query.query_by)
                };
                (score > 0.0).then(|| FullTextHit {
                    document: doc.clone(),
                    score,
                })
            })
            .collect();

        if let Some(sort_by) = &query.sort_by {
            let (field, descending) = sort_by
                .rsplit_once(':')
                .map_or((sort_by.as_str(), true), |(field, dir)| {
                    (field, dir.eq_ignore_ascii_case("desc"))
                });
            hits.sort_by(|a, b| {
                let ka = sort_key(&a.document, field);
                let kb = sort_key(&b.document, field);
                let ord = ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal);
                if descending { ord.reverse() } else { ord }
            });
        } else {
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn update_document(&self, collection: &str, id: &str, patch: &Value) -> Result<()> {
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        let document = col
            .documents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {id}")))?;
        deep_merge(document, patch);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.write();
        Ok(collections
            .get_mut(collection)
            .is_some_and(|col| col.documents.remove(id).is_some()))
    }

    async fn delete_by_filter(&self, collection: &str, filter_by: &str) -> Result<u64> {
        let filter = FilterExpr::parse(filter_by)?;
        let mut collections = self.collections.write();
        let Some(col) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = col.documents.len();
        col.documents.retain(|_, doc| !filter.matches(doc));
        Ok((before - col.documents.len()) as u64)
    }

    async fn count_documents(&self, collection: &str, filter_by: Option<&str>) -> Result<u64> {
        let filter = filter_by.map(FilterExpr::parse).transpose()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |col| {
                col.documents
                    .values()
                    .filter(|doc| filter.as_ref().is_none_or(|f| f.matches(doc)))
                    .count() as u64
            }))
    }

    async fn health_check(&self) -> AdapterHealth {
        let total: usize = self
            .collections
            .read()
            .values()
            .map(|col| col.documents.len())
            .sum();
        AdapterHealth::healthy(self.name()).with_details(format!("{total} documents"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded_store() -> InMemoryFullTextStore {
        let store = InMemoryFullTextStore::new();
        store
            .ensure_collection(&FullTextSchema {
                name: "knowledge_base".to_string(),
                query_fields: vec!["title".to_string(), "content".to_string()],
                facet_fields: vec!["knowledge_type".to_string(), "tags".to_string()],
                default_sort_field: Some("usefulness_score".to_string()),
            })
            .await
            .unwrap();
        store
            .index_document(
                "knowledge_base",
                &json!({
                    "id": "k1",
                    "title": "Rail freight preference",
                    "content": "Customer prefers rail for inland legs",
                    "knowledge_type": "recommendation",
                    "usefulness_score": 0.9,
                }),
            )
            .await
            .unwrap();
        store
            .index_document(
                "knowledge_base",
                &json!({
                    "id": "k2",
                    "title": "Customs delays",
                    "content": "Repeated customs delays at the border",
                    "knowledge_type": "pattern",
                    "usefulness_score": 0.4,
                }),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn text_search_scores_token_overlap() {
        let store = seeded_store().await;
        let hits = store
            .search(
                "knowledge_base",
                &FullTextQuery {
                    q: "rail freight".to_string(),
                    query_by: vec!["title".to_string(), "content".to_string()],
                    filter_by: None,
                    sort_by: None,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document["id"], "k1");
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn filter_restricts_and_sort_orders() {
        let store = seeded_store().await;
        let hits = store
            .search(
                "knowledge_base",
                &FullTextQuery {
                    q: "*".to_string(),
                    query_by: vec!["title".to_string()],
                    filter_by: Some("knowledge_type:='pattern'".to_string()),
                    sort_by: Some("usefulness_score:desc".to_string()),
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document["id"], "k2");
    }

    #[tokio::test]
    async fn update_merges_patch() {
        let store = seeded_store().await;
        store
            .update_document("knowledge_base", "k1", &json!({"access_count": 5}))
            .await
            .unwrap();
        let doc = store
            .get_document("knowledge_base", "k1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["access_count"], 5);
        assert_eq!(doc["title"], "Rail freight preference");
    }

    #[tokio::test]
    async fn delete_by_filter_counts_removals() {
        let store = seeded_store().await;
        let removed = store
            .delete_by_filter("knowledge_base", "usefulness_score:<0.5")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_documents("knowledge_base", None).await.unwrap(), 1);
    }
}
