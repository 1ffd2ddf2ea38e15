//! System configuration: typed defaults for every tier and engine plus
//! environment-variable overrides for deployment tunables and backend
//! endpoints.

use serde::{Deserialize, Serialize};

use crate::ciar::CiarConfig;
use crate::metrics::MetricsConfig;
use crate::tiers::{ActiveContextConfig, EpisodicConfig, SemanticConfig, WorkingMemoryConfig};

/// Feature flags for ablation: a disabled engine reports a skipped cycle
/// without side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemFlags {
    pub enable_promotion: bool,
    pub enable_consolidation: bool,
    pub enable_distillation: bool,
    pub enable_telemetry: bool,
}

impl Default for SystemFlags {
    fn default() -> Self {
        Self {
            enable_promotion: true,
            enable_consolidation: true,
            enable_distillation: true,
            enable_telemetry: true,
        }
    }
}

/// Backend endpoints and credentials.
///
/// The KV hot path is an embedded redb file and the durable relational
/// store is libsql/Turso; `REDIS_URL` and `POSTGRES_URL` are accepted as
/// aliases for those slots so existing deployments keep working.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Path of the embedded KV store file
    pub kv_path: Option<String>,
    /// libsql URL (`libsql://…`, `file:…`, or `:memory:`)
    pub database_url: Option<String>,
    pub database_auth_token: Option<String>,

    pub qdrant_url: Option<String>,
    pub qdrant_collection: Option<String>,
    pub qdrant_vector_size: Option<usize>,

    pub typesense_url: Option<String>,
    pub typesense_api_key: Option<String>,

    pub neo4j_uri: Option<String>,
    pub neo4j_user: Option<String>,
    pub neo4j_password: Option<String>,
}

/// Top-level configuration for the unified memory system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub l1: ActiveContextConfig,
    pub l2: WorkingMemoryConfig,
    pub l3: EpisodicConfig,
    pub l4: SemanticConfig,
    pub ciar: CiarConfig,
    pub metrics: MetricsConfig,
    pub flags: SystemFlags,
    pub backends: BackendConfig,
    /// Minimum CIAR for context assembly
    pub min_ciar: f64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            l1: ActiveContextConfig::default(),
            l2: WorkingMemoryConfig::default(),
            l3: EpisodicConfig::default(),
            l4: SemanticConfig::default(),
            ciar: CiarConfig::default(),
            metrics: MetricsConfig::default(),
            flags: SystemFlags::default(),
            backends: BackendConfig::default(),
            min_ciar: 0.6,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

impl SystemConfig {
    /// Build a configuration from defaults overridden by the environment.
    ///
    /// Recognized variables: `MAS_L1_WINDOW`, `MAS_L1_TTL_HOURS`,
    /// `MAS_MIN_CIAR`, `REDB_PATH` (alias `REDIS_URL`), `TURSO_URL` /
    /// `TURSO_AUTH_TOKEN` (alias `POSTGRES_URL`), `QDRANT_URL` /
    /// `QDRANT_COLLECTION` / `QDRANT_VECTOR_SIZE`, `TYPESENSE_URL` /
    /// `TYPESENSE_API_KEY`, `NEO4J_URI` / `NEO4J_USER` / `NEO4J_PASSWORD`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(window) = env_parse::<usize>("MAS_L1_WINDOW") {
            config.l1.window_size = window;
        }
        if let Some(ttl_hours) = env_parse::<u64>("MAS_L1_TTL_HOURS") {
            config.l1.ttl_hours = ttl_hours;
        }
        if let Some(min_ciar) = env_parse::<f64>("MAS_MIN_CIAR") {
            config.min_ciar = min_ciar;
            config.l2.ciar_threshold = min_ciar;
            config.ciar.threshold = min_ciar;
        }

        config.backends.kv_path = env_var("REDB_PATH").or_else(|| env_var("REDIS_URL"));
        config.backends.database_url =
            env_var("TURSO_URL").or_else(|| env_var("POSTGRES_URL"));
        config.backends.database_auth_token = env_var("TURSO_AUTH_TOKEN");

        config.backends.qdrant_url = env_var("QDRANT_URL");
        config.backends.qdrant_collection = env_var("QDRANT_COLLECTION");
        config.backends.qdrant_vector_size = env_parse("QDRANT_VECTOR_SIZE");
        if let Some(collection) = &config.backends.qdrant_collection {
            config.l3.collection.clone_from(collection);
        }
        if let Some(vector_size) = config.backends.qdrant_vector_size {
            config.l3.vector_size = vector_size;
        }

        config.backends.typesense_url = env_var("TYPESENSE_URL");
        config.backends.typesense_api_key = env_var("TYPESENSE_API_KEY");

        config.backends.neo4j_uri = env_var("NEO4J_URI");
        config.backends.neo4j_user = env_var("NEO4J_USER");
        config.backends.neo4j_password = env_var("NEO4J_PASSWORD");

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_documented_values() {
        let config = SystemConfig::default();
        assert_eq!(config.l1.window_size, 20);
        assert_eq!(config.l1.ttl_hours, 24);
        assert!((config.l2.ciar_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.l2.ttl_days, 7);
        assert_eq!(config.l3.vector_size, 768);
        assert_eq!(config.l3.collection, "episodes");
        assert_eq!(config.l4.collection, "knowledge_base");
        assert!(config.flags.enable_promotion);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = SystemConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let back: SystemConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back.l1.window_size, config.l1.window_size);
    }
}
