//! In-memory cache implementation on top of `dashmap`.
//!
//! Expiry is evaluated lazily against `tokio::time::Instant`, so tests
//! running under `tokio::time::pause` observe TTLs on virtual time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::traits::cache::{CacheProvider, CacheWrite};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Instant,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory cache provider.
///
/// Atomicity of the conditional operations comes from the per-shard
/// lock `dashmap` holds while an entry is borrowed.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheProvider {
    entries: Arc<DashMap<String, Slot>>,
    /// When set every operation fails with a cache error.
    failing: Arc<AtomicBool>,
    /// When set only `write_batch` fails.
    failing_batches: Arc<AtomicBool>,
}

impl MemoryCacheProvider {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `write_batch` fail while every other operation keeps working.
    pub fn set_failing_batches(&self, failing: bool) {
        self.failing_batches.store(failing, Ordering::SeqCst);
    }

    /// Remaining time-to-live of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| slot.live(now))
            .map(|slot| slot.expires_at - now)
    }

    /// Unconditionally store a string value.
    pub fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.put(key, value, ttl);
    }

    /// Read a live string value without going through the trait.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.read(key, Instant::now())
    }

    fn check(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::cache("memory cache is unavailable"));
        }
        Ok(())
    }

    fn read(&self, key: &str, now: Instant) -> Option<String> {
        match self.entries.get(key) {
            Some(slot) if slot.live(now) => match &slot.value {
                Value::Str(s) => Some(s.clone()),
                Value::Hash(_) => None,
            },
            _ => None,
        }
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let slot = Slot {
            value: Value::Str(value.to_string()),
            expires_at: now + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().live(now) {
                    return false;
                }
                occupied.insert(slot);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                true
            }
        }
    }

    fn holds(slot: &Slot, expected: &str, now: Instant) -> bool {
        slot.live(now) && matches!(&slot.value, Value::Str(s) if s == expected)
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        self.check()?;
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.read(k, now)).collect())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        self.check()?;
        Ok(self.put_if_absent(key, value, ttl))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> AppResult<bool> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove_if(key, |_, slot| Self::holds(slot, expected, now))
            .is_some())
    }

    async fn write_batch(&self, writes: &[CacheWrite]) -> AppResult<()> {
        self.check()?;
        if self.failing_batches.load(Ordering::SeqCst) {
            return Err(AppError::cache("memory cache rejected the write batch"));
        }
        for write in writes {
            match write {
                CacheWrite::Set { key, value, ttl } => self.put(key, value, *ttl),
                CacheWrite::SetIfAbsent { key, value, ttl } => {
                    self.put_if_absent(key, value, *ttl);
                }
                CacheWrite::CompareAndSet {
                    key,
                    expected,
                    value,
                    ttl,
                } => {
                    let now = Instant::now();
                    if let Some(mut slot) = self.entries.get_mut(key.as_str()) {
                        if Self::holds(&slot, expected, now) {
                            slot.value = Value::Str(value.clone());
                            slot.expires_at = now + *ttl;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> AppResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Hash(HashMap::new()),
            expires_at: now,
        });
        if !slot.live(now) || !matches!(slot.value, Value::Hash(_)) {
            slot.value = Value::Hash(HashMap::new());
        }
        if let Value::Hash(fields) = &mut slot.value {
            fields.insert(field.to_string(), value.to_string());
        }
        slot.expires_at = now + ttl;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> AppResult<()> {
        self.check()?;
        if let Some(mut slot) = self.entries.get_mut(key) {
            if let Value::Hash(fields) = &mut slot.value {
                fields.remove(field);
            }
        }
        self.entries
            .remove_if(key, |_, slot| matches!(&slot.value, Value::Hash(f) if f.is_empty()));
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<Vec<(String, String)>> {
        self.check()?;
        let now = Instant::now();
        Ok(match self.entries.get(key) {
            Some(slot) if slot.live(now) => match &slot.value {
                Value::Hash(fields) => fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                Value::Str(_) => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(!self.failing.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_respects_expiry() {
        let cache = MemoryCacheProvider::new();
        assert!(cache.set_nx("k", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!cache.set_nx("k", "b", Duration::from_secs(1)).await.unwrap());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.set_nx("k", "b", Duration::from_secs(1)).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_failing_batches_leave_other_operations_working() {
        let cache = MemoryCacheProvider::new();
        cache.set_failing_batches(true);
        let write = CacheWrite::Set {
            key: "k".into(),
            value: "v".into(),
            ttl: Duration::from_secs(10),
        };
        let err = cache.write_batch(std::slice::from_ref(&write)).await.unwrap_err();
        assert_eq!(err.kind, texhub_core::error::ErrorKind::Cache);
        assert_eq!(cache.peek("k"), None);
        assert!(cache.set_nx("lock", "me", Duration::from_secs(10)).await.unwrap());

        cache.set_failing_batches(false);
        cache.write_batch(&[write]).await.unwrap();
        assert_eq!(cache.peek("k"), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_compare_and_delete_only_matching_value() {
        let cache = MemoryCacheProvider::new();
        cache.insert("k", "mine", Duration::from_secs(10));
        assert!(!cache.compare_and_delete("k", "theirs").await.unwrap());
        assert!(cache.compare_and_delete("k", "mine").await.unwrap());
        assert_eq!(cache.peek("k"), None);
    }

    #[tokio::test]
    async fn test_compare_and_set_in_batch() {
        let cache = MemoryCacheProvider::new();
        cache.insert("k", "5", Duration::from_secs(10));
        cache
            .write_batch(&[
                CacheWrite::CompareAndSet {
                    key: "k".into(),
                    expected: "4".into(),
                    value: "9".into(),
                    ttl: Duration::from_secs(10),
                },
                CacheWrite::CompareAndSet {
                    key: "k".into(),
                    expected: "5".into(),
                    value: "6".into(),
                    ttl: Duration::from_secs(10),
                },
                CacheWrite::SetIfAbsent {
                    key: "k".into(),
                    value: "7".into(),
                    ttl: Duration::from_secs(10),
                },
            ])
            .await
            .unwrap();
        assert_eq!(cache.peek("k"), Some("6".to_string()));
    }

    #[tokio::test]
    async fn test_hash_fields() {
        let cache = MemoryCacheProvider::new();
        cache
            .hash_set("h", "a", "1", Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .hash_set("h", "b", "2", Duration::from_secs(10))
            .await
            .unwrap();
        let mut all = cache.hash_get_all("h").await.unwrap();
        all.sort();
        assert_eq!(all, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);

        cache.hash_delete("h", "a").await.unwrap();
        cache.hash_delete("h", "b").await.unwrap();
        assert!(cache.hash_get_all("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let cache = MemoryCacheProvider::new();
        cache.set_failing(true);
        assert!(cache.get("k").await.is_err());
        assert!(!cache.health_check().await.unwrap());
    }
}
