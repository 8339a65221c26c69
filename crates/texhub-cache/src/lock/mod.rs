//! Per-document distributed mutual exclusion over the shared cache.
//!
//! A lock is a key `<namespace>{<id>}` holding a unique value with a TTL.
//! Only the holder of that exact value may delete it, and a lock whose
//! TTL has elapsed is never released explicitly: by then the key may
//! already belong to somebody else.

mod token;

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use texhub_core::config::LockConfig;
use texhub_core::error::{AppError, ErrorKind};
use texhub_core::result::AppResult;
use texhub_core::retry::{Backoff, Clock, TokioClock};
use texhub_core::traits::cache::CacheProvider;

use crate::keys;

pub use token::TokenGenerator;

/// Distributed lock factory.
#[derive(Debug, Clone)]
pub struct DocumentLock {
    cache: Arc<dyn CacheProvider>,
    config: LockConfig,
    backoff: Backoff,
    tokens: Arc<TokenGenerator>,
    clock: Arc<dyn Clock>,
}

/// A held lock.
///
/// Dropping the guard without calling [`LockGuard::release`] spawns a
/// best-effort release on the current runtime.
#[derive(Debug)]
pub struct LockGuard {
    cache: Arc<dyn CacheProvider>,
    key: String,
    value: String,
    lock_expired_after: Instant,
    released: bool,
}

impl DocumentLock {
    /// Create a lock factory on the tokio clock.
    pub fn new(cache: Arc<dyn CacheProvider>, config: LockConfig) -> Self {
        Self::with_clock(cache, config, Arc::new(TokioClock))
    }

    /// Create a lock factory with an explicit clock.
    pub fn with_clock(
        cache: Arc<dyn CacheProvider>,
        config: LockConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backoff = Backoff::exponential(
            std::time::Duration::from_millis(config.backoff_initial_ms),
            std::time::Duration::from_millis(config.backoff_max_ms),
        );
        Self {
            cache,
            config,
            backoff,
            tokens: Arc::new(TokenGenerator::new()),
            clock,
        }
    }

    /// Acquire the lock for `entity_id`, polling until the configured
    /// maximum wait elapses.
    pub async fn acquire(&self, entity_id: &str) -> AppResult<LockGuard> {
        self.acquire_inner(entity_id, true).await
    }

    /// Acquire the lock for `entity_id` with a single attempt.
    pub async fn try_acquire(&self, entity_id: &str) -> AppResult<LockGuard> {
        self.acquire_inner(entity_id, false).await
    }

    /// Run `work` while holding the lock, waiting for it if necessary.
    ///
    /// The token handed to `work` is cancelled at the work deadline; if
    /// `work` has not finished by then it is dropped and
    /// `DeadlineExceeded` is returned.
    pub async fn run_with_lock<F, Fut, T>(&self, entity_id: &str, work: F) -> AppResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let guard = self.acquire(entity_id).await?;
        Self::run_guarded(guard, work).await
    }

    /// Like [`Self::run_with_lock`] but fails with `Locked` instead of waiting.
    pub async fn try_run_with_lock<F, Fut, T>(&self, entity_id: &str, work: F) -> AppResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let guard = self.try_acquire(entity_id).await?;
        Self::run_guarded(guard, work).await
    }

    async fn run_guarded<F, Fut, T>(guard: LockGuard, work: F) -> AppResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let cancel = CancellationToken::new();
        let deadline = guard.work_deadline();
        let outcome = tokio::select! {
            result = work(cancel.clone()) => result,
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                Err(AppError::deadline_exceeded(format!(
                    "work under lock {} outlived the lock ttl",
                    guard.key
                )))
            }
        };
        let key = guard.key.clone();
        match guard.release().await {
            Ok(()) => outcome,
            // Someone else held the key while the work ran.
            Err(e) if e.kind == ErrorKind::InvalidState => outcome.and(Err(e)),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to release lock");
                outcome
            }
        }
    }

    async fn acquire_inner(&self, entity_id: &str, poll: bool) -> AppResult<LockGuard> {
        let key = keys::lock(&self.config.namespace, entity_id);
        let value = self.tokens.next_token();
        let ttl = self.config.ttl();
        let op_timeout = self.config.operation_timeout();
        let give_up_at = self.clock.now() + self.config.max_wait();

        for delay in self.backoff.delays() {
            let attempt = tokio::time::timeout(op_timeout, self.cache.set_nx(&key, &value, ttl)).await;
            let attempted_at = self.clock.now();

            let failure = match attempt {
                Ok(Ok(true)) => {
                    debug!(key = %key, "Lock acquired");
                    return Ok(LockGuard {
                        cache: Arc::clone(&self.cache),
                        key,
                        value,
                        lock_expired_after: attempted_at + ttl,
                        released: false,
                    });
                }
                Ok(Ok(false)) => AppError::locked(format!("lock {key} is held")),
                Ok(Err(e)) => {
                    self.release_ambiguous(&key, &value).await;
                    e
                }
                Err(elapsed) => {
                    self.release_ambiguous(&key, &value).await;
                    AppError::from(elapsed)
                }
            };

            if !poll {
                return Err(failure);
            }
            if attempted_at + delay >= give_up_at {
                return Err(AppError::new(
                    ErrorKind::DeadlineExceeded,
                    format!("timed out waiting for lock {key}"),
                ));
            }
            self.clock.sleep(delay).await;
        }

        Err(AppError::internal("lock backoff schedule ended"))
    }

    /// The attempt may have landed on the server even though we saw an
    /// error; delete our value so the lock cannot leak.
    async fn release_ambiguous(&self, key: &str, value: &str) {
        let attempt = tokio::time::timeout(
            self.config.operation_timeout(),
            self.cache.compare_and_delete(key, value),
        )
        .await;
        match attempt {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "Defensive lock release failed"),
            Err(_) => warn!(key = %key, "Defensive lock release timed out"),
        }
    }
}

impl LockGuard {
    /// Cache key of the lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Instant after which the lock must be considered lost.
    pub fn lock_expired_after(&self) -> Instant {
        self.lock_expired_after
    }

    /// Deadline for work done under the lock.
    pub fn work_deadline(&self) -> Instant {
        self.lock_expired_after
    }

    /// Release the lock.
    ///
    /// Does nothing once the ttl has passed. A release that cannot finish
    /// before the ttl would have passed counts as done. Fails with
    /// `InvalidState` when the key holds another value before the ttl.
    pub async fn release(mut self) -> AppResult<()> {
        self.released = true;
        release(
            Arc::clone(&self.cache),
            std::mem::take(&mut self.key),
            std::mem::take(&mut self.value),
            self.lock_expired_after,
        )
        .await
    }
}

async fn release(
    cache: Arc<dyn CacheProvider>,
    key: String,
    value: String,
    lock_expired_after: Instant,
) -> AppResult<()> {
    if Instant::now() >= lock_expired_after {
        debug!(key = %key, "Lock already expired, skipping release");
        return Ok(());
    }
    match tokio::time::timeout_at(lock_expired_after, cache.compare_and_delete(&key, &value)).await
    {
        Ok(Ok(true)) => {
            debug!(key = %key, "Lock released");
            Ok(())
        }
        Ok(Ok(false)) => Err(AppError::invalid_state(format!(
            "lock {key} was taken over before it expired"
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(()),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = Arc::clone(&self.cache);
        let key = std::mem::take(&mut self.key);
        let value = std::mem::take(&mut self.value);
        let expires = self.lock_expired_after;
        handle.spawn(async move {
            if let Err(e) = release(cache, key.clone(), value, expires).await {
                warn!(key = %key, error = %e, "Failed to release dropped lock");
            }
        });
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryCacheProvider;

    fn setup() -> (MemoryCacheProvider, DocumentLock) {
        let cache = MemoryCacheProvider::new();
        let lock = DocumentLock::new(Arc::new(cache.clone()), LockConfig::default());
        (cache, lock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_try_run_exactly_one_wins() {
        let (_cache, lock) = setup();
        let work = |_: CancellationToken| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, AppError>(())
        };
        let (a, b) = tokio::join!(
            lock.try_run_with_lock("doc-1", work),
            lock.try_run_with_lock("doc-1", work)
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(|r| r.err()).unwrap();
        assert_eq!(err.kind, ErrorKind::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_keys_do_not_contend() {
        let (_cache, lock) = setup();
        let a = lock.try_acquire("doc-1").await.unwrap();
        let b = lock.try_acquire("doc-2").await.unwrap();
        a.release().await.unwrap();
        b.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hammering_one_key_never_overlaps() {
        let (_cache, lock) = setup();
        let holders = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let lock = lock.clone();
            let holders = Arc::clone(&holders);
            tasks.push(tokio::spawn(async move {
                lock.run_with_lock("doc-1", |_| async move {
                    let inside = holders.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    assert_eq!(inside, 0);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    holders.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, AppError>(())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_gives_up_with_deadline_exceeded() {
        let (cache, lock) = setup();
        cache.insert("doclock{doc-1}", "someone-else", Duration::from_secs(60));
        let start = Instant::now();
        let err = lock.acquire("doc-1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
        assert!(Instant::now() - start <= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_acquires_after_holder_expires() {
        let (cache, lock) = setup();
        cache.insert("doclock{doc-1}", "someone-else", Duration::from_secs(2));
        let guard = lock.acquire("doc-1").await.unwrap();
        assert_ne!(cache.peek("doclock{doc-1}").unwrap(), "someone-else");
        guard.release().await.unwrap();
        assert_eq!(cache.peek("doclock{doc-1}"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_release_keeps_new_holder() {
        let (cache, lock) = setup();
        let guard = lock.try_acquire("doc-1").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.insert("doclock{doc-1}", "new-holder", Duration::from_secs(30));

        guard.release().await.unwrap();
        assert_eq!(cache.peek("doclock{doc-1}"), Some("new-holder".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_does_not_delete_foreign_value() {
        let (cache, lock) = setup();
        let guard = lock.try_acquire("doc-1").await.unwrap();
        cache.insert("doclock{doc-1}", "stolen", Duration::from_secs(30));
        let err = guard.release().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert_eq!(cache.peek("doclock{doc-1}"), Some("stolen".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_under_a_stolen_lock_fails() {
        let (cache, lock) = setup();
        let thief = cache.clone();
        let err = lock
            .run_with_lock("doc-1", |_| async move {
                thief.insert("doclock{doc-1}", "stolen", Duration::from_secs(30));
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert_eq!(cache.peek("doclock{doc-1}"), Some("stolen".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_reports_deadline_exceeded() {
        let (_cache, lock) = setup();
        let err = lock
            .run_with_lock("doc-1", |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, AppError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_surfaces_cache_failure() {
        let (cache, lock) = setup();
        cache.set_failing(true);
        let err = lock.try_acquire("doc-1").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cache);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_releases() {
        let (cache, lock) = setup();
        drop(lock.try_acquire("doc-1").await.unwrap());
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.peek("doclock{doc-1}"), None);
    }
}
