//! Adapter wiring: build the capability bundle from configuration,
//! preferring configured backends and falling back to in-memory stores.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use strata_core::config::SystemConfig;
use strata_core::error::Result;
use strata_core::llm::LlmClient;
use strata_core::storage::memory::{
    InMemoryFullTextStore, InMemoryGraphStore, InMemoryKvStore, InMemoryVectorStore,
};
use strata_core::storage::{FullTextStore, GraphStore, KvListStore, RelationalStore, VectorStore};
use strata_core::system::{MemoryAdapters, UnifiedMemorySystem};
use strata_storage_http::{Neo4jGraphStore, QdrantVectorStore, TypesenseFullTextStore};
use strata_storage_redb::RedbKvStore;
use strata_storage_turso::TursoRelationalStore;

/// Build the adapter bundle from configuration.
///
/// Configured backends are connected (and the relational schema verified,
/// including the fatal full-text index check); unconfigured slots fall
/// back to in-memory adapters.
pub async fn build_adapters(config: &SystemConfig) -> Result<MemoryAdapters> {
    let kv: Arc<dyn KvListStore> = match &config.backends.kv_path {
        Some(path) => {
            info!("KV hot path: redb at {path}");
            Arc::new(RedbKvStore::open(Path::new(path)).await?)
        }
        None => {
            info!("KV hot path: in-memory");
            Arc::new(InMemoryKvStore::new())
        }
    };

    let relational: Arc<dyn RelationalStore> = match &config.backends.database_url {
        Some(url) => {
            info!("Relational store: turso at {url}");
            let token = config
                .backends
                .database_auth_token
                .clone()
                .unwrap_or_default();
            let store = TursoRelationalStore::connect(url, &token).await?;
            store.initialize().await?;
            store.verify_fulltext_index().await?;
            Arc::new(store)
        }
        None => {
            info!("Relational store: in-memory");
            Arc::new(strata_core::storage::memory::InMemoryRelationalStore::new())
        }
    };

    let vector: Arc<dyn VectorStore> = match &config.backends.qdrant_url {
        Some(url) => {
            info!("Vector store: qdrant at {url}");
            Arc::new(QdrantVectorStore::new(url.clone()))
        }
        None => {
            info!("Vector store: in-memory");
            Arc::new(InMemoryVectorStore::new())
        }
    };

    let graph: Arc<dyn GraphStore> = match (&config.backends.neo4j_uri, &config.backends.neo4j_user)
    {
        (Some(uri), Some(user)) => {
            info!("Graph store: neo4j at {uri}");
            Arc::new(Neo4jGraphStore::new(
                uri.clone(),
                user.clone(),
                config.backends.neo4j_password.clone().unwrap_or_default(),
            ))
        }
        _ => {
            info!("Graph store: in-memory");
            Arc::new(InMemoryGraphStore::new())
        }
    };

    let fulltext: Arc<dyn FullTextStore> = match (
        &config.backends.typesense_url,
        &config.backends.typesense_api_key,
    ) {
        (Some(url), Some(api_key)) => {
            info!("Full-text store: typesense at {url}");
            Arc::new(TypesenseFullTextStore::new(url.clone(), api_key.clone()))
        }
        _ => {
            info!("Full-text store: in-memory");
            Arc::new(InMemoryFullTextStore::new())
        }
    };

    Ok(MemoryAdapters {
        kv,
        relational,
        vector,
        graph,
        fulltext,
    })
}

/// Build and initialize the full memory system from configuration.
pub async fn build_memory_system(config: SystemConfig) -> Result<Arc<UnifiedMemorySystem>> {
    let adapters = build_adapters(&config).await?;
    let llm = Arc::new(LlmClient::from_env());
    let memory = Arc::new(UnifiedMemorySystem::new(adapters, llm, config));
    memory.initialize().await?;
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_build_an_in_memory_system() {
        let memory = build_memory_system(SystemConfig::default()).await.unwrap();
        let health = memory.health_check().await;
        assert_eq!(health.tiers.len(), 4);
    }

    #[tokio::test]
    async fn embedded_backends_wire_from_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = SystemConfig::default();
        config.backends.kv_path = Some(dir.path().join("kv.redb").display().to_string());
        config.backends.database_url =
            Some(format!("file:{}", dir.path().join("mem.db").display()));

        let memory = build_memory_system(config).await.unwrap();
        let turn = strata_core::models::Turn::new(
            "s1",
            "t1",
            strata_core::models::Role::User,
            "persisted across adapters",
        );
        memory.store_turn(&turn).await.unwrap();
        assert_eq!(memory.l1().retrieve_session("s1").await.unwrap().len(), 1);
    }
}
