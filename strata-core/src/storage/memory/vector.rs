use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::storage::{
    cosine_similarity, AdapterHealth, PayloadFilter, VectorHit, VectorPoint, VectorStore,
};

#[derive(Debug, Default)]
struct Collection {
    dimension: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-memory vector index with cosine scoring.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &'static str {
        "memory_vector"
    }

    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: HashMap::new(),
            });
        Ok(())
    }

    async fn upsert_point(&self, collection: &str, point: VectorPoint) -> Result<()> {
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;
        if point.vector.len() != col.dimension {
            return Err(Error::Data(format!(
                "vector dimension {} does not match collection dimension {}",
                point.vector.len(),
                col.dimension
            )));
        }
        col.points.insert(point.id.clone(), point);
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: Vec<VectorPoint>) -> Result<()> {
        for point in points {
            self.upsert_point(collection, point).await?;
        }
        Ok(())
    }

    async fn retrieve_point(&self, collection: &str, id: &str) -> Result<Option<VectorPoint>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|col| col.points.get(id))
            .cloned())
    }

    async fn search_by_vector(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let collections = self.collections.read();
        let col = collections
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;

        let mut hits: Vec<VectorHit> = col
            .points
            .values()
            .filter(|point| filter.is_none_or(|f| f.matches_payload(&point.payload)))
            .map(|point| VectorHit {
                id: point.id.clone(),
                score: cosine_similarity(vector, &point.vector),
                payload: point.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
        limit: usize,
    ) -> Result<Vec<VectorPoint>> {
        let collections = self.collections.read();
        let col = collections
            .get(collection)
            .ok_or_else(|| Error::NotFound(format!("collection {collection}")))?;

        let mut points: Vec<VectorPoint> = col
            .points
            .values()
            .filter(|point| filter.is_none_or(|f| f.matches_payload(&point.payload)))
            .cloned()
            .collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        points.truncate(limit);
        Ok(points)
    }

    async fn delete_points(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(col) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in ids {
            if col.points.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn count_points(
        &self,
        collection: &str,
        filter: Option<&PayloadFilter>,
    ) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |col| {
                col.points
                    .values()
                    .filter(|point| filter.is_none_or(|f| f.matches_payload(&point.payload)))
                    .count() as u64
            }))
    }

    async fn health_check(&self) -> AdapterHealth {
        let total: usize = self
            .collections
            .read()
            .values()
            .map(|col| col.points.len())
            .sum();
        AdapterHealth::healthy(self.name()).with_details(format!("{total} points"))
    }
}
