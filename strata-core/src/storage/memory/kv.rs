use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{AdapterHealth, KvListStore};

#[derive(Debug, Default)]
struct KvEntry {
    list: VecDeque<String>,
    value: Option<String>,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory KV-list store with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, KvEntry>>,
}

impl InMemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut KvEntry>) -> T,
    ) -> T {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }
}

fn trim_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    start = start.max(0);
    stop = stop.min(len - 1);
    if start > stop || len == 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    // Supports '*' wildcards only, which is all the tiers use
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

#[async_trait]
impl KvListStore for InMemoryKvStore {
    fn name(&self) -> &'static str {
        "memory_kv"
    }

    async fn list_push_trim_expire(
        &self,
        key: &str,
        value: &str,
        keep: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        // Single locked section: the push, trim, and expire commit together
        let entry = entries.entry(key.to_string()).or_default();
        entry.list.push_front(value.to_string());
        entry.list.truncate(keep);
        entry.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_default();
        entry.list.push_front(value.to_string());
        Ok(entry.list.len())
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.with_live_entry(key, |entry| {
            if let Some(entry) = entry {
                match trim_range(entry.list.len(), start, stop) {
                    Some((from, to)) => {
                        entry.list = entry
                            .list
                            .iter()
                            .skip(from)
                            .take(to - from + 1)
                            .cloned()
                            .collect();
                    }
                    None => entry.list.clear(),
                }
            }
        });
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self.with_live_entry(key, |entry| {
            entry.map_or_else(Vec::new, |entry| {
                trim_range(entry.list.len(), start, stop).map_or_else(Vec::new, |(from, to)| {
                    entry
                        .list
                        .iter()
                        .skip(from)
                        .take(to - from + 1)
                        .cloned()
                        .collect()
                })
            })
        }))
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        Ok(self.with_live_entry(key, |entry| entry.map_or(0, |e| e.list.len())))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_live_entry(key, |entry| {
            entry.map_or(false, |entry| {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            })
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.with_live_entry(key, |entry| {
            entry.and_then(|entry| {
                entry
                    .expires_at
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            })
        }))
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn delete_key(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn key_exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_live_entry(key, |entry| entry.is_some()))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            KvEntry {
                list: VecDeque::new(),
                value: Some(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn extend_if_value(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        Ok(self.with_live_entry(key, |entry| {
            entry.map_or(false, |entry| {
                if entry.value.as_deref() == Some(value) {
                    entry.expires_at = Some(Instant::now() + ttl);
                    true
                } else {
                    false
                }
            })
        }))
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            return Ok(false);
        }
        if entries
            .get(key)
            .is_some_and(|entry| entry.value.as_deref() == Some(value))
        {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_live_entry(key, |entry| entry.and_then(|e| e.value.clone())))
    }

    async fn health_check(&self) -> AdapterHealth {
        AdapterHealth::healthy(self.name())
            .with_details(format!("{} keys", self.entries.lock().len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipeline_keeps_window_and_ttl() {
        let kv = InMemoryKvStore::new();
        for i in 0..10 {
            kv.list_push_trim_expire("{session:s1}:turns", &format!("turn-{i}"), 5, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let window = kv.list_range("{session:s1}:turns", 0, -1).await.unwrap();
        assert_eq!(window.len(), 5);
        assert_eq!(window[0], "turn-9");
        assert!(kv.ttl("{session:s1}:turns").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_keys_read_as_absent() {
        let kv = InMemoryKvStore::new();
        kv.list_push_trim_expire("k", "v", 5, Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(kv.list_len("k").await.unwrap(), 0);
        assert!(!kv.key_exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn scan_keys_globs() {
        let kv = InMemoryKvStore::new();
        kv.list_push("{session:a}:turns", "x").await.unwrap();
        kv.list_push("{session:b}:turns", "x").await.unwrap();
        kv.list_push("other", "x").await.unwrap();

        let mut keys = kv.scan_keys("{session:*}:turns").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["{session:a}:turns", "{session:b}:turns"]);
    }

    #[tokio::test]
    async fn lock_primitives_respect_ownership() {
        let kv = InMemoryKvStore::new();
        assert!(kv
            .set_if_absent("lease:s1", "owner-a", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!kv
            .set_if_absent("lease:s1", "owner-b", Duration::from_secs(30))
            .await
            .unwrap());

        assert!(kv
            .extend_if_value("lease:s1", "owner-a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!kv
            .extend_if_value("lease:s1", "owner-b", Duration::from_secs(60))
            .await
            .unwrap());

        assert!(!kv.delete_if_value("lease:s1", "owner-b").await.unwrap());
        assert!(kv.delete_if_value("lease:s1", "owner-a").await.unwrap());
        assert!(!kv.key_exists("lease:s1").await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_key_returns_false() {
        let kv = InMemoryKvStore::new();
        assert!(!kv.delete_key("absent").await.unwrap());
    }

    #[test]
    fn trim_range_handles_negative_indexes() {
        assert_eq!(trim_range(10, 0, -1), Some((0, 9)));
        assert_eq!(trim_range(10, 0, 4), Some((0, 4)));
        assert_eq!(trim_range(3, 5, 9), None);
        assert_eq!(trim_range(0, 0, -1), None);
    }
}
