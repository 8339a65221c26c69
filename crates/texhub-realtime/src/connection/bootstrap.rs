//! Rate-limited bootstrap execution.
//!
//! Bootstraps (token check plus room join) run on a fixed number of
//! workers fed by a bounded queue. Two deadlines bound a reconnect storm:
//!
//! * hard limit: a caller never waits longer than this from enqueue to
//!   verdict, and a worker skips jobs whose caller already gave up;
//! * soft limit: when the oldest queued job has waited this long, the
//!   cancellation token shared by the running bootstraps is torn down and
//!   replaced, so workers abandon slow work and move through the backlog.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use texhub_core::config::RealtimeConfig;
use texhub_core::error::AppError;
use texhub_core::result::AppResult;

type Work = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct Job {
    enqueued_at: Instant,
    run: Work,
}

#[derive(Debug)]
struct Shared {
    /// Enqueue instants of queued jobs, oldest first.
    queued: Mutex<VecDeque<Instant>>,
    /// Token handed to bootstraps starting now.
    current: Mutex<CancellationToken>,
}

impl Shared {
    fn current_token(&self) -> CancellationToken {
        self.current
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|_| CancellationToken::new())
    }

    fn oldest_queued(&self) -> Option<Instant> {
        self.queued.lock().ok().and_then(|q| q.front().copied())
    }

    fn pop_queued(&self) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.pop_front();
        }
    }

    /// Cancel the running bootstraps and start a fresh generation.
    fn rotate_token(&self) {
        if let Ok(mut current) = self.current.lock() {
            let old = std::mem::replace(&mut *current, CancellationToken::new());
            old.cancel();
        }
    }
}

/// Bounded bootstrap worker pool.
pub struct BootstrapPool {
    jobs: mpsc::Sender<Job>,
    shared: Arc<Shared>,
    hard_limit: Duration,
}

impl std::fmt::Debug for BootstrapPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapPool")
            .field("queued", &self.queued())
            .field("hard_limit", &self.hard_limit)
            .finish()
    }
}

impl BootstrapPool {
    /// Spawn the bootstrap workers on `tracker`. They stop when `cancel` fires.
    pub fn start(config: &RealtimeConfig, tracker: &TaskTracker, cancel: CancellationToken) -> Arc<Self> {
        let (jobs, rx) = mpsc::channel(config.bootstrap_queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            queued: Mutex::new(VecDeque::new()),
            current: Mutex::new(CancellationToken::new()),
        });
        let hard_limit = config.bootstrap_hard_limit();

        for worker in 0..config.bootstrap_workers.max(1) {
            tracker.spawn(run_worker(
                worker,
                Arc::clone(&rx),
                Arc::clone(&shared),
                hard_limit,
                cancel.clone(),
            ));
        }
        tracker.spawn(watch_soft_limit(
            Arc::clone(&shared),
            config.bootstrap_soft_limit(),
            cancel,
        ));

        Arc::new(Self {
            jobs,
            shared,
            hard_limit,
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queued.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run `work` on a bootstrap worker and wait for its verdict.
    ///
    /// Fails with `ServiceUnavailable` when the queue is full or the work
    /// was abandoned under load, and with `DeadlineExceeded` once the hard
    /// limit passes. All of these are retryable.
    pub async fn submit<F, Fut, T>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let enqueued_at = Instant::now();
        let job = Job {
            enqueued_at,
            run: Box::new(move |token| {
                Box::pin(async move {
                    let _ = tx.send(work(token).await);
                })
            }),
        };

        {
            let mut queued = self
                .shared
                .queued
                .lock()
                .map_err(|_| AppError::internal("Bootstrap queue poisoned"))?;
            self.jobs
                .try_send(job)
                .map_err(|_| AppError::service_unavailable("Bootstrap queue is full"))?;
            queued.push_back(enqueued_at);
        }

        match timeout_at(enqueued_at + self.hard_limit, rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => Err(AppError::service_unavailable(
                "Bootstrap abandoned under load",
            )),
            Err(_) => Err(AppError::deadline_exceeded("Bootstrap hard limit exceeded")),
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    shared: Arc<Shared>,
    hard_limit: Duration,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };
        shared.pop_queued();

        if job.enqueued_at.elapsed() >= hard_limit {
            // The caller has already been answered.
            continue;
        }

        let token = shared.current_token();
        let work = (job.run)(token.clone());
        tokio::select! {
            _ = token.cancelled() => debug!(worker, "Bootstrap abandoned"),
            _ = work => {}
        }
    }
    debug!(worker, "Bootstrap worker stopped");
}

async fn watch_soft_limit(shared: Arc<Shared>, soft_limit: Duration, cancel: CancellationToken) {
    let period = (soft_limit / 4).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(oldest) = shared.oldest_queued() else {
            continue;
        };
        if oldest.elapsed() >= soft_limit {
            warn!(
                waited_ms = oldest.elapsed().as_millis() as u64,
                "Bootstrap backlog past soft limit, abandoning running bootstraps"
            );
            shared.rotate_token();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texhub_core::error::ErrorKind;
    use tokio::task::JoinSet;

    fn config(workers: usize, queue: usize, soft_ms: u64, hard_ms: u64) -> RealtimeConfig {
        RealtimeConfig {
            bootstrap_workers: workers,
            bootstrap_queue_size: queue,
            bootstrap_soft_limit_ms: soft_ms,
            bootstrap_hard_limit_ms: hard_ms,
            ..RealtimeConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_storm_never_waits_past_hard_limit() {
        let hard = Duration::from_millis(3_000);
        let pool = BootstrapPool::start(
            &config(60, 20_000, 1_000, 3_000),
            &TaskTracker::new(),
            CancellationToken::new(),
        );

        let mut set = JoinSet::new();
        for i in 0..10_000u32 {
            let pool = Arc::clone(&pool);
            set.spawn(async move {
                let started = Instant::now();
                let verdict = pool
                    .submit(move |_token| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(i)
                    })
                    .await;
                (started.elapsed(), verdict)
            });
        }

        let (mut ok, mut rejected) = (0, 0);
        while let Some(joined) = set.join_next().await {
            let (waited, verdict) = joined.unwrap();
            assert!(waited <= hard, "waited {waited:?}");
            match verdict {
                Ok(_) => ok += 1,
                Err(e) => {
                    assert!(e.is_retryable());
                    rejected += 1;
                }
            }
        }
        assert!(ok > 0);
        assert_eq!(ok + rejected, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_immediately() {
        let pool = BootstrapPool::start(
            &config(1, 1, 10_000, 30_000),
            &TaskTracker::new(),
            CancellationToken::new(),
        );
        let (started_tx, started) = oneshot::channel::<()>();
        let (release, gate) = oneshot::channel::<()>();
        let busy = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(move |_| async move {
                    let _ = started_tx.send(());
                    let _ = gate.await;
                    Ok(())
                })
                .await
            })
        };
        started.await.unwrap();

        let queued = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit(|_| async { Ok(()) }).await })
        };
        while pool.queued() == 0 {
            tokio::task::yield_now().await;
        }

        let err = pool.submit(|_| async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);

        release.send(()).unwrap();
        busy.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_limit_abandons_slow_bootstrap() {
        let pool = BootstrapPool::start(
            &config(1, 16, 100, 5_000),
            &TaskTracker::new(),
            CancellationToken::new(),
        );
        let slow = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(|_token| async move {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        let started = Instant::now();
        let fast = pool.submit(|_| async { Ok(7) }).await.unwrap();
        assert_eq!(fast, 7);
        assert!(started.elapsed() < Duration::from_millis(500));

        let err = slow.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    }
}
