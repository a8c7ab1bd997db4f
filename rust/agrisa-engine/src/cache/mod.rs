//! TTL cache with key-expiration notifications
//!
//! Stands in for the cache the lifecycle choreography signals through:
//! keys carry optional TTLs, a sweeper task publishes every expired key on
//! a broadcast channel (the `__keyevent@*__:expired` analogue the
//! expiration bus subscribes to), and staged multi-op transactions make a
//! draft-policy write group either fully visible or not at all.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const EXPIRED_CHANNEL_CAPACITY: usize = 256;

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process TTL cache
pub struct TtlCache {
    entries: DashMap<String, CacheEntry>,
    expired_tx: broadcast::Sender<String>,
    txn_lock: parking_lot::Mutex<()>,
}

impl TtlCache {
    /// Create the cache and start its expiration sweeper
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Arc<Self> {
        let (expired_tx, _) = broadcast::channel(EXPIRED_CHANNEL_CAPACITY);
        let cache = Arc::new(Self {
            entries: DashMap::new(),
            expired_tx,
            txn_lock: parking_lot::Mutex::new(()),
        });

        let sweeper = Arc::clone(&cache);
        tokio::spawn(async move {
            sweeper.sweep_loop().await;
        });

        cache
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let expired: Vec<String> = self
                .entries
                .iter()
                .filter(|e| e.value().is_expired(now))
                .map(|e| e.key().clone())
                .collect();
            for key in expired {
                if self.entries.remove(&key).is_some() {
                    // No receiver is fine; the signal is best-effort
                    let _ = self.expired_tx.send(key);
                }
            }
        }
    }

    /// Set a key without TTL
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Set a key that expires after `ttl`
    pub fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Attach a TTL to an existing key; false if the key is absent
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    /// Read a key; expired-but-unswept entries read as absent
    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Delete a key without firing an expiration notification
    pub fn del(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Subscribe to expired-key notifications
    pub fn subscribe_expired(&self) -> broadcast::Receiver<String> {
        self.expired_tx.subscribe()
    }

    /// Begin a staged multi-op transaction
    pub fn transaction(&self) -> CacheTransaction<'_> {
        CacheTransaction {
            cache: self,
            ops: Vec::new(),
        }
    }
}

enum CacheOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Del {
        key: String,
    },
}

/// Staged write group: queued operations apply on `exec` or vanish on
/// `discard` (or drop)
pub struct CacheTransaction<'a> {
    cache: &'a TtlCache,
    ops: Vec<CacheOp>,
}

impl CacheTransaction<'_> {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(CacheOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    pub fn set_with_ttl(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.ops.push(CacheOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.ops.push(CacheOp::Del { key: key.into() });
        self
    }

    /// Apply every staged operation as one group
    pub fn exec(self) {
        let _guard = self.cache.txn_lock.lock();
        for op in self.ops {
            match op {
                CacheOp::Set { key, value, ttl } => match ttl {
                    Some(ttl) => self.cache.set_with_ttl(key, value, ttl),
                    None => self.cache.set(key, value),
                },
                CacheOp::Del { key } => {
                    self.cache.del(&key);
                }
            }
        }
    }

    /// Drop every staged operation
    pub fn discard(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let cache = TtlCache::new();
        cache.set("k", "v");
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert!(cache.del("k"));
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_expiry_notifies_subscriber() {
        let cache = TtlCache::new();
        let mut expired = cache.subscribe_expired();

        cache.set_with_ttl("short", "v", Duration::from_millis(50));
        let key = tokio::time::timeout(Duration::from_secs(2), expired.recv())
            .await
            .expect("expiration notification timed out")
            .unwrap();
        assert_eq!(key, "short");
        assert!(cache.get("short").is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_reads_absent_before_sweep() {
        let cache = TtlCache::new();
        cache.set_with_ttl("k", "v", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_del_does_not_notify() {
        let cache = TtlCache::new();
        let mut expired = cache.subscribe_expired();
        cache.set("k", "v");
        cache.del("k");

        let outcome =
            tokio::time::timeout(Duration::from_millis(300), expired.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_transaction_exec_and_discard() {
        let cache = TtlCache::new();

        cache.transaction().set("a", "1").set("b", "2").exec();
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));

        cache.transaction().set("c", "3").del("a").discard();
        assert!(cache.get("c").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_expire_attaches_ttl() {
        let cache = TtlCache::new();
        assert!(!cache.expire("missing", Duration::from_secs(1)));
        cache.set("k", "v");
        assert!(cache.expire("k", Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("k").is_none());
    }
}
