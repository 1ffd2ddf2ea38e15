#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]

//! # Strata Storage - redb
//!
//! Embedded KV-list adapter over redb for the L1 hot path: windowed turn
//! lists with key TTLs and the lease-lock scalar operations. The
//! push + trim + expire pipeline runs inside a single write transaction,
//! so the three operations commit or fail together.
//!
//! ## Example
//!
//! ```no_run
//! use strata_storage_redb::RedbKvStore;
//! use std::path::Path;
//!
//! # async fn example() -> strata_core::Result<()> {
//! let store = RedbKvStore::open(Path::new("./strata.redb")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use redb::ReadableDatabase;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use strata_core::error::{Error, Result};
use strata_core::storage::{AdapterHealth, KvListStore};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv_entries");

/// Timeout for database operations.
const DB_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// One stored entry: a list, an optional scalar value, and an optional
/// wall-clock expiry.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KvRecord {
    #[serde(default)]
    list: Vec<String>,
    #[serde(default)]
    value: Option<String>,
    /// Unix epoch milliseconds
    #[serde(default)]
    expires_at_ms: Option<i64>,
}

impl KvRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|deadline| deadline <= now_ms)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_deadline(ttl: Duration) -> i64 {
    now_ms() + ttl.as_millis() as i64
}

/// Execute a blocking redb operation with a timeout.
async fn with_db_timeout<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(DB_OPERATION_TIMEOUT, tokio::task::spawn_blocking(operation)).await
    {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::Connection(format!("task join error: {join_err}"))),
        Err(_) => Err(Error::Timeout(format!(
            "database operation timed out after {DB_OPERATION_TIMEOUT:?}"
        ))),
    }
}

fn read_record(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<KvRecord>> {
    let Some(guard) = table
        .get(key)
        .map_err(|e| Error::Query(format!("failed to read key {key}: {e}")))?
    else {
        return Ok(None);
    };
    let record: KvRecord = serde_json::from_slice(guard.value())
        .map_err(|e| Error::Data(format!("corrupt record at {key}: {e}")))?;
    Ok(Some(record))
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }
    let mut remainder = candidate;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !remainder.starts_with(part) {
                return false;
            }
            remainder = &remainder[part.len()..];
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else if let Some(idx) = remainder.find(part) {
            remainder = &remainder[idx + part.len()..];
        } else {
            return false;
        }
    }
    true
}

/// redb-backed KV-list store.
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    /// Open (or create) the database file and initialize the table.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening redb KV store at {}", path.display());
        let path_buf = path.to_path_buf();
        let db = with_db_timeout(move || {
            Database::create(&path_buf)
                .map_err(|e| Error::Connection(format!("failed to open redb database: {e}")))
        })
        .await?;
        let db = Arc::new(db);

        let init_db = Arc::clone(&db);
        with_db_timeout(move || {
            let write_txn = init_db
                .begin_write()
                .map_err(|e| Error::Connection(format!("failed to begin write: {e}")))?;
            {
                let _table = write_txn
                    .open_table(KV_TABLE)
                    .map_err(|e| Error::Query(format!("failed to open kv table: {e}")))?;
            }
            write_txn
                .commit()
                .map_err(|e| Error::Query(format!("failed to commit: {e}")))?;
            Ok(())
        })
        .await?;

        info!("Successfully opened redb KV store");
        Ok(Self { db })
    }

    /// Run a read-modify-write on one record inside a single transaction.
    /// Expired records read as absent.
    async fn mutate<T, F>(&self, key: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(Option<KvRecord>) -> (Option<KvRecord>, T) + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::Connection(format!("failed to begin write: {e}")))?;
            let outcome;
            {
                let mut table = write_txn
                    .open_table(KV_TABLE)
                    .map_err(|e| Error::Query(format!("failed to open kv table: {e}")))?;

                let current = read_record(&table, &key)?
                    .filter(|record| !record.is_expired(now_ms()));
                let (updated, result) = mutate(current);
                match updated {
                    Some(record) => {
                        let bytes = serde_json::to_vec(&record)
                            .map_err(|e| Error::Data(format!("serialize record: {e}")))?;
                        table
                            .insert(key.as_str(), bytes.as_slice())
                            .map_err(|e| Error::Query(format!("failed to write {key}: {e}")))?;
                    }
                    None => {
                        table
                            .remove(key.as_str())
                            .map_err(|e| Error::Query(format!("failed to remove {key}: {e}")))?;
                    }
                }
                outcome = result;
            }
            write_txn
                .commit()
                .map_err(|e| Error::Query(format!("failed to commit: {e}")))?;
            Ok(outcome)
        })
        .await
    }

    /// Read one live record.
    async fn load(&self, key: &str) -> Result<Option<KvRecord>> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        with_db_timeout(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::Connection(format!("failed to begin read: {e}")))?;
            let table = read_txn
                .open_table(KV_TABLE)
                .map_err(|e| Error::Query(format!("failed to open kv table: {e}")))?;
            Ok(read_record(&table, &key)?.filter(|record| !record.is_expired(now_ms())))
        })
        .await
    }

    /// Remove expired records; returns the number swept.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::Connection(format!("failed to begin write: {e}")))?;
            let mut swept = 0;
            {
                let mut table = write_txn
                    .open_table(KV_TABLE)
                    .map_err(|e| Error::Query(format!("failed to open kv table: {e}")))?;

                let now = now_ms();
                let expired: Vec<String> = table
                    .iter()
                    .map_err(|e| Error::Query(format!("failed to iterate: {e}")))?
                    .filter_map(std::result::Result::ok)
                    .filter_map(|(key, value)| {
                        serde_json::from_slice::<KvRecord>(value.value())
                            .ok()
                            .filter(|record| record.is_expired(now))
                            .map(|_| key.value().to_string())
                    })
                    .collect();
                for key in expired {
                    table
                        .remove(key.as_str())
                        .map_err(|e| Error::Query(format!("failed to remove {key}: {e}")))?;
                    swept += 1;
                }
            }
            write_txn
                .commit()
                .map_err(|e| Error::Query(format!("failed to commit: {e}")))?;
            debug!("Swept {swept} expired KV records");
            Ok(swept)
        })
        .await
    }
}

#[async_trait]
impl KvListStore for RedbKvStore {
    fn name(&self) -> &'static str {
        "redb_kv"
    }

    async fn list_push_trim_expire(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<()> {
        let value = value.to_string();
        let deadline = ttl_deadline(ttl);
        // One transaction: the push, trim, and TTL refresh commit together
        self.mutate(key, move |current| {
            let mut record = current.unwrap_or_default();
            record.list.insert(0, value);
            record.list.truncate(keep);
            record.expires_at_ms = Some(deadline);
            (Some(record), ())
        })
        .await
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let value = value.to_string();
        self.mutate(key, move |current| {
            let mut record = current.unwrap_or_default();
            record.list.insert(0, value);
            let len = record.list.len();
            (Some(record), len)
        })
        .await
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.mutate(key, move |current| {
            let Some(mut record) = current else {
                return (None, ());
            };
            record.list = slice_range(&record.list, start, stop);
            (Some(record), ())
        })
        .await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .load(key)
            .await?
            .map(|record| slice_range(&record.list, start, stop))
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.load(key).await?.map_or(0, |record| record.list.len()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let deadline = ttl_deadline(ttl);
        self.mutate(key, move |current| match current {
            Some(mut record) => {
                record.expires_at_ms = Some(deadline);
                (Some(record), true)
            }
            None => (None, false),
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.load(key).await?.and_then(|record| {
            record.expires_at_ms.map(|deadline| {
                Duration::from_millis((deadline - now_ms()).max(0) as u64)
            })
        }))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let pattern = pattern.to_string();
        with_db_timeout(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::Connection(format!("failed to begin read: {e}")))?;
            let table = read_txn
                .open_table(KV_TABLE)
                .map_err(|e| Error::Query(format!("failed to open kv table: {e}")))?;

            let now = now_ms();
            let keys = table
                .iter()
                .map_err(|e| Error::Query(format!("failed to iterate: {e}")))?
                .filter_map(std::result::Result::ok)
                .filter(|(key, value)| {
                    glob_match(&pattern, key.value())
                        && serde_json::from_slice::<KvRecord>(value.value())
                            .map(|record| !record.is_expired(now))
                            .unwrap_or(false)
                })
                .map(|(key, _)| key.value().to_string())
                .collect();
            Ok(keys)
        })
        .await
    }

    async fn delete_key(&self, key: &str) -> Result<bool> {
        self.mutate(key, |current| (None, current.is_some())).await
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        Ok(self.load(key).await?.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let value = value.to_string();
        let deadline = ttl_deadline(ttl);
        self.mutate(key, move |current| match current {
            Some(record) => (Some(record), false),
            None => (
                Some(KvRecord {
                    list: Vec::new(),
                    value: Some(value),
                    expires_at_ms: Some(deadline),
                }),
                true,
            ),
        })
        .await
    }

    async fn extend_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let value = value.to_string();
        let deadline = ttl_deadline(ttl);
        self.mutate(key, move |current| match current {
            Some(mut record) if record.value.as_deref() == Some(value.as_str()) => {
                record.expires_at_ms = Some(deadline);
                (Some(record), true)
            }
            other => (other, false),
        })
        .await
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let value = value.to_string();
        self.mutate(key, move |current| match current {
            Some(record) if record.value.as_deref() == Some(value.as_str()) => (None, true),
            other => (other, false),
        })
        .await
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load(key).await?.and_then(|record| record.value))
    }

    async fn health_check(&self) -> AdapterHealth {
        let db = Arc::clone(&self.db);
        let result = with_db_timeout(move || {
            db.begin_read()
                .map(|_| ())
                .map_err(|e| Error::Connection(format!("health check failed: {e}")))
        })
        .await;
        match result {
            Ok(()) => AdapterHealth::healthy(self.name()),
            Err(e) => AdapterHealth::unhealthy(self.name(), e.to_string()),
        }
    }
}

fn slice_range(list: &[String], start: i64, stop: i64) -> Vec<String> {
    let len = list.len() as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if len == 0 || start > stop {
        return Vec::new();
    }
    list[start as usize..=stop as usize].to_vec()
}
