//! Epoch-based authorization cache.
//!
//! Tokens carry the epoch of their user and project at signing time. A
//! token stays valid while those epochs match the current ones, which are
//! cached under `epoch:<field>:<id>`. The primary store stays
//! authoritative: any cache failure, miss, or tombstone routes the check
//! there, and cache writes never block or fail a caller.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use texhub_core::config::EpochConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;
use texhub_core::traits::cache::{CacheProvider, CacheWrite};
use texhub_core::traits::epoch::{EpochField, EpochSource};

use crate::keys;

/// Sentinel written over an epoch slot while the primary value changes.
pub const TOMBSTONE: i64 = -42;

/// One epoch a caller presents for verification.
#[derive(Clone)]
pub struct EpochItem {
    /// Entity kind.
    pub field: EpochField,
    /// Entity id.
    pub entity_id: String,
    /// Epoch carried by the caller's token.
    pub presented: i64,
    /// Where the authoritative value lives.
    pub source: Arc<dyn EpochSource>,
}

impl fmt::Debug for EpochItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochItem")
            .field("field", &self.field)
            .field("entity_id", &self.entity_id)
            .field("presented", &self.presented)
            .finish()
    }
}

impl EpochItem {
    /// Build an item.
    pub fn new(
        field: EpochField,
        entity_id: impl Into<String>,
        presented: i64,
        source: Arc<dyn EpochSource>,
    ) -> Self {
        Self {
            field,
            entity_id: entity_id.into(),
            presented,
            source,
        }
    }

    fn key(&self) -> String {
        keys::epoch(self.field, &self.entity_id)
    }
}

/// What the cache told us about one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cached {
    Miss,
    Unavailable,
    Tombstone,
    Value(i64),
}

impl Cached {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::parse::<i64>) {
            None => Self::Miss,
            Some(Ok(TOMBSTONE)) => Self::Tombstone,
            Some(Ok(v)) => Self::Value(v),
            Some(Err(_)) => Self::Unavailable,
        }
    }
}

/// Epoch cache over the shared cache provider.
#[derive(Debug, Clone)]
pub struct EpochCache {
    cache: Arc<dyn CacheProvider>,
    config: EpochConfig,
}

impl EpochCache {
    /// Create an epoch cache.
    pub fn new(cache: Arc<dyn CacheProvider>, config: EpochConfig) -> Self {
        Self { cache, config }
    }

    /// Verify every presented epoch.
    ///
    /// Fails with `Validation` when an item carries no epoch and with
    /// `Unauthorized` when an epoch does not match the current one.
    pub async fn check(&self, items: &[EpochItem]) -> AppResult<()> {
        for item in items {
            if item.presented <= 0 {
                return Err(AppError::validation(format!(
                    "missing {} epoch for {}",
                    item.field, item.entity_id
                )));
            }
        }

        let cached = self.read(items).await;
        let mut writes = Vec::new();
        let verdict = self.verify(items, &cached, &mut writes).await;
        self.write_back(writes);
        verdict
    }

    /// Invalidate the epoch of an entity.
    ///
    /// The tombstone lands in the cache before the primary increment
    /// commits; if it cannot be written the increment is not attempted.
    pub async fn bump_epoch(
        &self,
        field: EpochField,
        entity_id: &str,
        source: &dyn EpochSource,
    ) -> AppResult<i64> {
        let key = keys::epoch(field, entity_id);
        self.cache
            .write_batch(&[CacheWrite::Set {
                key,
                value: TOMBSTONE.to_string(),
                ttl: self.config.tombstone_ttl(),
            }])
            .await
            .map_err(|e| {
                AppError::with_source(
                    e.kind,
                    format!("Failed to tombstone {field} epoch of {entity_id}"),
                    e,
                )
            })?;

        let epoch = source.increment_epoch(field, entity_id).await?;
        debug!(%field, entity_id, epoch, "Epoch bumped");
        Ok(epoch)
    }

    async fn read(&self, items: &[EpochItem]) -> Vec<Cached> {
        let keys: Vec<String> = items.iter().map(EpochItem::key).collect();
        match self.cache.get_many(&keys).await {
            Ok(values) if values.len() == items.len() => values
                .iter()
                .map(|v| Cached::parse(v.as_deref()))
                .collect(),
            Ok(_) => vec![Cached::Unavailable; items.len()],
            Err(e) => {
                debug!(error = %e, "Epoch cache read failed, using primary store");
                vec![Cached::Unavailable; items.len()]
            }
        }
    }

    async fn verify(
        &self,
        items: &[EpochItem],
        cached: &[Cached],
        writes: &mut Vec<CacheWrite>,
    ) -> AppResult<()> {
        for (item, cached) in items.iter().zip(cached) {
            match *cached {
                Cached::Value(current) if item.presented == current => continue,
                Cached::Value(current) if item.presented < current => {
                    return Err(stale(item));
                }
                Cached::Value(current) => {
                    // Ahead of the cache: a bump may have overrun the
                    // tombstone, so only the primary store can decide.
                    let authoritative = item.source.fetch_epoch(item.field, &item.entity_id).await?;
                    if authoritative != item.presented {
                        return Err(stale(item));
                    }
                    writes.push(CacheWrite::CompareAndSet {
                        key: item.key(),
                        expected: current.to_string(),
                        value: authoritative.to_string(),
                        ttl: self.config.ttl(),
                    });
                }
                Cached::Miss | Cached::Unavailable | Cached::Tombstone => {
                    let authoritative = item.source.fetch_epoch(item.field, &item.entity_id).await?;
                    if *cached == Cached::Miss && authoritative != TOMBSTONE {
                        writes.push(CacheWrite::SetIfAbsent {
                            key: item.key(),
                            value: authoritative.to_string(),
                            ttl: self.config.ttl(),
                        });
                    }
                    if authoritative != item.presented {
                        return Err(stale(item));
                    }
                }
            }
        }
        Ok(())
    }

    fn write_back(&self, writes: Vec<CacheWrite>) {
        if writes.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.write_back_timeout();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, cache.write_batch(&writes)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Epoch write-back failed"),
                Err(_) => warn!(count = writes.len(), "Epoch write-back timed out"),
            }
        });
    }
}

fn stale(item: &EpochItem) -> AppError {
    AppError::unauthorized(format!("stale {} epoch for {}", item.field, item.entity_id))
}
