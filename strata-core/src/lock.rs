//! Lease-based distributed lock for long-running engine operations that
//! must serialize per session.
//!
//! Acquire takes a TTL'd key via SET-if-absent; a background task renews
//! the lease at an interval below the TTL; release is idempotent and only
//! removes the key while the owner token still matches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::KvListStore;

/// Lease configuration. The renewal interval must stay below the TTL.
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub ttl: Duration,
    pub renewal_interval: Duration,
    pub key_prefix: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            renewal_interval: Duration::from_secs(10),
            key_prefix: "lease".to_string(),
        }
    }
}

/// Factory for per-resource lease guards.
pub struct SessionLease {
    kv: Arc<dyn KvListStore>,
    config: LeaseConfig,
}

impl SessionLease {
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the renewal interval is not below
    /// the TTL.
    pub fn new(kv: Arc<dyn KvListStore>, config: LeaseConfig) -> Result<Self> {
        if config.renewal_interval >= config.ttl {
            return Err(Error::Config(
                "lease renewal interval must be below the TTL".to_string(),
            ));
        }
        Ok(Self { kv, config })
    }

    fn key_for(&self, resource: &str) -> String {
        format!("{}:{resource}", self.config.key_prefix)
    }

    /// Acquire the lease for `resource`, spawning the renewal task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lock`] when another holder owns the lease.
    pub async fn acquire(&self, resource: &str) -> Result<LeaseGuard> {
        let key = self.key_for(resource);
        let token = Uuid::new_v4().to_string();

        let acquired = self
            .kv
            .set_if_absent(&key, &token, self.config.ttl)
            .await?;
        if !acquired {
            return Err(Error::Lock(format!("lease already held: {resource}")));
        }
        debug!("Acquired lease {key}");

        let renew_kv = Arc::clone(&self.kv);
        let renew_key = key.clone();
        let renew_token = token.clone();
        let ttl = self.config.ttl;
        let interval = self.config.renewal_interval;
        let renewal_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                match renew_kv.extend_if_value(&renew_key, &renew_token, ttl).await {
                    Ok(true) => debug!("Renewed lease {renew_key}"),
                    Ok(false) => {
                        warn!("Lease {renew_key} lost before renewal; stopping");
                        break;
                    }
                    Err(e) => {
                        warn!("Lease renewal for {renew_key} failed: {e}");
                    }
                }
            }
        });

        Ok(LeaseGuard {
            kv: Arc::clone(&self.kv),
            key,
            token,
            renewal_task,
            released: AtomicBool::new(false),
        })
    }

    /// Whether a lease for `resource` is currently held by anyone.
    pub async fn is_held(&self, resource: &str) -> Result<bool> {
        self.kv.key_exists(&self.key_for(resource)).await
    }
}

/// A held lease. Dropping the guard stops renewal; call
/// [`LeaseGuard::release`] to remove the key eagerly.
pub struct LeaseGuard {
    kv: Arc<dyn KvListStore>,
    key: String,
    token: String,
    renewal_task: JoinHandle<()>,
    released: AtomicBool,
}

impl LeaseGuard {
    /// Release the lease. Idempotent; succeeds even when the lease already
    /// expired or was taken over.
    pub async fn release(&self) -> Result<()> {
        self.renewal_task.abort();
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let deleted = self.kv.delete_if_value(&self.key, &self.token).await?;
        if !deleted {
            debug!("Lease {} already gone at release", self.key);
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.renewal_task.abort();
    }
}
