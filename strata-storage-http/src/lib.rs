#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

//! # Strata Storage - HTTP
//!
//! Thin REST adapters over reqwest for the networked backends: Qdrant
//! (vector index), Typesense (full-text documents), and the Neo4j HTTP
//! transactional endpoint (graph). Each implements the matching capability
//! trait from `strata-core`; recoverable transport failures retry with
//! backoff.

mod neo4j;
mod qdrant;
mod typesense;

pub use neo4j::Neo4jGraphStore;
pub use qdrant::QdrantVectorStore;
pub use typesense::TypesenseFullTextStore;

use strata_core::error::Error;

/// Map a reqwest transport failure onto the error taxonomy.
pub(crate) fn transport_error(backend: &str, error: &reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(format!("{backend} request timed out: {error}"))
    } else {
        Error::Connection(format!("{backend} request failed: {error}"))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
pub(crate) fn status_error(backend: &str, status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::NOT_FOUND {
        Error::NotFound(format!("{backend}: {body}"))
    } else if status.is_server_error() {
        Error::Connection(format!("{backend} error ({status}): {body}"))
    } else {
        Error::Query(format!("{backend} error ({status}): {body}"))
    }
}
