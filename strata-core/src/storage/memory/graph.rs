use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::models::{EntityRef, MentionEdge};
use crate::storage::{AdapterHealth, GraphEpisode, GraphStore};

#[derive(Debug, Clone)]
struct Mention {
    episode_id: String,
    entity_id: String,
    edge: MentionEdge,
}

#[derive(Debug, Default)]
struct Graph {
    episodes: HashMap<String, GraphEpisode>,
    entities: HashMap<String, EntityRef>,
    mentions: Vec<Mention>,
}

/// In-memory graph store over `Episode` and `Entity` nodes with
/// `MENTIONS` edges.
///
/// The raw-query escape hatch is rejected here; only Cypher-capable
/// backends execute arbitrary queries.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<Graph>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn name(&self) -> &'static str {
        "memory_graph"
    }

    async fn upsert_episode_node(&self, episode: &GraphEpisode) -> Result<String> {
        let mut graph = self.graph.write();
        graph
            .episodes
            .insert(episode.episode_id.clone(), episode.clone());
        Ok(episode.episode_id.clone())
    }

    async fn upsert_entity_mention(
        &self,
        episode_id: &str,
        entity: &EntityRef,
        edge: &MentionEdge,
    ) -> Result<()> {
        let mut graph = self.graph.write();
        if !graph.episodes.contains_key(episode_id) {
            return Err(Error::NotFound(format!("episode {episode_id}")));
        }
        graph
            .entities
            .insert(entity.entity_id.clone(), entity.clone());
        // MERGE semantics: one edge per (episode, entity) pair
        graph
            .mentions
            .retain(|m| !(m.episode_id == episode_id && m.entity_id == entity.entity_id));
        graph.mentions.push(Mention {
            episode_id: episode_id.to_string(),
            entity_id: entity.entity_id.clone(),
            edge: edge.clone(),
        });
        Ok(())
    }

    async fn set_episode_vector_id(&self, episode_id: &str, vector_id: &str) -> Result<()> {
        let mut graph = self.graph.write();
        let episode = graph
            .episodes
            .get_mut(episode_id)
            .ok_or_else(|| Error::NotFound(format!("episode {episode_id}")))?;
        episode.vector_id = Some(vector_id.to_string());
        Ok(())
    }

    async fn get_episode_node(&self, episode_id: &str) -> Result<Option<GraphEpisode>> {
        Ok(self.graph.read().episodes.get(episode_id).cloned())
    }

    async fn episode_entities(&self, episode_id: &str) -> Result<Vec<EntityRef>> {
        let graph = self.graph.read();
        Ok(graph
            .mentions
            .iter()
            .filter(|m| m.episode_id == episode_id)
            .filter_map(|m| graph.entities.get(&m.entity_id).cloned())
            .collect())
    }

    async fn episodes_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<GraphEpisode>> {
        let graph = self.graph.read();
        let mut episodes: Vec<GraphEpisode> = graph
            .episodes
            .values()
            .filter(|episode| episode.session_id == session_id)
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.time_window_end.cmp(&a.time_window_end));
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn query_temporal(
        &self,
        query_time: DateTime<Utc>,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GraphEpisode>> {
        let graph = self.graph.read();
        let mut episodes: Vec<GraphEpisode> = graph
            .episodes
            .values()
            .filter(|episode| session_id.is_none_or(|s| episode.session_id == s))
            .filter(|episode| episode.valid_at(query_time))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| {
            b.importance_score
                .partial_cmp(&a.importance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn all_episode_ids(&self) -> Result<Vec<String>> {
        Ok(self.graph.read().episodes.keys().cloned().collect())
    }

    async fn episodes_missing_vector_id(&self) -> Result<Vec<String>> {
        Ok(self
            .graph
            .read()
            .episodes
            .values()
            .filter(|episode| episode.vector_id.is_none())
            .map(|episode| episode.episode_id.clone())
            .collect())
    }

    async fn delete_episode(&self, episode_id: &str) -> Result<bool> {
        let mut graph = self.graph.write();
        let existed = graph.episodes.remove(episode_id).is_some();
        graph.mentions.retain(|m| m.episode_id != episode_id);
        Ok(existed)
    }

    async fn execute_parameterized_query(
        &self,
        _query: &str,
        _params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>> {
        Err(Error::Query(
            "raw graph queries require a Cypher-capable backend".to_string(),
        ))
    }

    async fn health_check(&self) -> AdapterHealth {
        let graph = self.graph.read();
        AdapterHealth::healthy(self.name()).with_details(format!(
            "{} episodes, {} entities, {} mentions",
            graph.episodes.len(),
            graph.entities.len(),
            graph.mentions.len()
        ))
    }
}
