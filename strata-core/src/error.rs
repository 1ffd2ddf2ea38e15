use std::fmt;

/// Result type alias for memory operations
pub type Result<T> = std::result::Result<T, Error>;

/// The four storage tiers of the memory cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TierKind {
    /// L1: recent conversational turns (windowed, TTL'd)
    L1ActiveContext,
    /// L2: significant facts gated by CIAR score
    L2WorkingMemory,
    /// L3: consolidated episodes, dual-indexed
    L3EpisodicMemory,
    /// L4: distilled knowledge documents
    L4SemanticMemory,
}

impl TierKind {
    /// Stable name used in logs, metrics labels, and health reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::L1ActiveContext => "L1_active_context",
            TierKind::L2WorkingMemory => "L2_working_memory",
            TierKind::L3EpisodicMemory => "L3_episodic_memory",
            TierKind::L4SemanticMemory => "L4_semantic_memory",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for the memory system.
///
/// Adapter failures map onto five families (`Connection`, `Timeout`, `Query`,
/// `Data`, `NotFound`); tiers wrap them in [`Error::Tier`] preserving the
/// underlying cause.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("{tier} {operation} failed: {source}")]
    Tier {
        tier: TierKind,
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an adapter error in a tier-operation error, preserving the cause.
    #[must_use]
    pub fn tier(tier: TierKind, operation: &'static str, source: Error) -> Self {
        Error::Tier {
            tier,
            operation,
            source: Box::new(source),
        }
    }

    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Timeout(_) => true,
            Error::Query(_) => false,
            Error::Data(_) => false,
            Error::NotFound(_) => false,
            Error::Serialization(_) => false,
            Error::Config(_) => false,
            Error::Llm(_) => true,
            Error::Lock(_) => false,
            Error::Tier { source, .. } => source.is_recoverable(),
            Error::Io(_) => true,
        }
    }

    /// Error family label used for metrics error counters.
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            Error::Connection(_) => "connection",
            Error::Timeout(_) => "timeout",
            Error::Query(_) => "query",
            Error::Data(_) => "data",
            Error::NotFound(_) => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Llm(_) => "llm",
            Error::Lock(_) => "lock",
            Error::Tier { source, .. } => source.family(),
            Error::Io(_) => "io",
        }
    }
}
