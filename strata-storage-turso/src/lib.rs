#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

//! # Strata Storage - Turso
//!
//! Turso/libSQL relational adapter: the durable cold path for L1 turns and
//! the home of L2 working-memory facts, with an FTS5 full-text index over
//! `working_memory.content` (its absence is a fatal configuration error at
//! startup).
//!
//! ## Example
//!
//! ```no_run
//! use strata_storage_turso::TursoRelationalStore;
//!
//! # async fn example() -> strata_core::Result<()> {
//! let store = TursoRelationalStore::connect("file:strata.db", "").await?;
//! store.initialize().await?;
//! # Ok(())
//! # }
//! ```

mod schema;
mod storage;

use std::sync::Arc;

use libsql::{Builder, Connection, Database};
use tracing::info;

use strata_core::error::{Error, Result};

/// libSQL-backed relational store.
pub struct TursoRelationalStore {
    db: Arc<Database>,
}

impl TursoRelationalStore {
    /// Connect to a Turso database.
    ///
    /// Only `libsql://`, `file:`, and `:memory:` URLs are accepted; remote
    /// connections require a non-empty auth token.
    pub async fn connect(url: &str, token: &str) -> Result<Self> {
        info!("Connecting to Turso database at {url}");

        if !url.starts_with("libsql://") && !url.starts_with("file:") && url != ":memory:" {
            return Err(Error::Config(format!(
                "insecure database URL: {url}. Only libsql://, file:, or :memory: are allowed"
            )));
        }
        if url.starts_with("libsql://") && token.trim().is_empty() {
            return Err(Error::Config(
                "authentication token required for remote Turso connections".to_string(),
            ));
        }

        let db = if url.starts_with("libsql://") {
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
                .map_err(|e| Error::Connection(format!("failed to connect to Turso: {e}")))?
        } else {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .map_err(|e| Error::Connection(format!("failed to open local database: {e}")))?
        };

        info!("Successfully connected to Turso database");
        Ok(Self { db: Arc::new(db) })
    }

    /// Wrap an already-built database (local test files).
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Create tables, indexes, the FTS5 index, and its sync triggers, then
    /// verify the full-text index landed.
    pub async fn initialize(&self) -> Result<()> {
        let conn = self.connection()?;

        for statement in [
            schema::CREATE_ACTIVE_CONTEXT_TABLE,
            schema::CREATE_WORKING_MEMORY_TABLE,
            schema::CREATE_ACTIVE_CONTEXT_SESSION_INDEX,
            schema::CREATE_WORKING_MEMORY_SESSION_INDEX,
            schema::CREATE_WORKING_MEMORY_EXTRACTED_INDEX,
            schema::CREATE_WORKING_MEMORY_FTS_TABLE,
        ] {
            conn.execute(statement, ())
                .await
                .map_err(|e| Error::Query(format!("schema creation failed: {e}")))?;
        }
        for trigger in schema::CREATE_WORKING_MEMORY_FTS_TRIGGERS {
            conn.execute(trigger, ())
                .await
                .map_err(|e| Error::Query(format!("trigger creation failed: {e}")))?;
        }

        info!("Initialized relational schema with FTS5 index");
        Ok(())
    }

    pub(crate) fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| Error::Connection(format!("failed to get connection: {e}")))
    }
}
