//! Rate-limited request queue for the external parsing service.
//!
//! Every call to the service flows through [`RequestQueue::submit`],
//! which enforces three protections:
//!
//! 1. A concurrency bound: at most `max_concurrent_requests` calls are
//!    in flight at once.
//! 2. Dispatch spacing: consecutive dispatches are at least
//!    `min_dispatch_interval` apart, smoothing bursts below the
//!    service's rate limit.
//! 3. Bounded admission: once `max_queue_depth` operations are waiting
//!    behind the bound, further submissions fast-fail with
//!    [`Error::QueueFull`] instead of piling up.
//!
//! Retryable failures are retried in place with exponential backoff
//! (see [`RetryPolicy`]), honoring any server-provided `Retry-After`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use docflow_core::{defaults, Error, Result};

use crate::retry::RetryPolicy;

/// Tuning for the request queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent_requests: usize,
    pub min_dispatch_interval: Duration,
    pub max_queue_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: defaults::MAX_CONCURRENT_REQUESTS,
            min_dispatch_interval: Duration::from_millis(defaults::MIN_DISPATCH_INTERVAL_MS),
            max_queue_depth: defaults::MAX_QUEUE_DEPTH,
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared gate in front of the parsing service.
pub struct RequestQueue {
    config: QueueConfig,
    /// Bounds in-flight operations.
    concurrency: Arc<Semaphore>,
    /// Bounds admitted operations (in flight + waiting).
    admission: Arc<Semaphore>,
    /// Earliest instant the next dispatch may happen.
    next_dispatch: Mutex<Instant>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_requests));
        let admission = Arc::new(Semaphore::new(
            config.max_queue_depth + config.max_concurrent_requests,
        ));
        Self {
            config,
            concurrency,
            admission,
            next_dispatch: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Run `op` through the queue, retrying retryable failures.
    ///
    /// The closure is invoked once per attempt so request bodies must
    /// be reconstructable (callers capture `Arc`s, not owned buffers).
    pub async fn submit<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let _admitted = self.admission.try_acquire().map_err(|_| {
            warn!(
                subsystem = "parse",
                component = "queue",
                op = op_name,
                depth = self.config.max_queue_depth,
                "queue full, rejecting operation"
            );
            Error::QueueFull(self.config.max_queue_depth)
        })?;

        let _in_flight = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| Error::Queue("request queue semaphore closed".to_string()))?;

        let mut attempt: u32 = 0;
        loop {
            self.reserve_dispatch_slot().await;

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && self.config.retry.should_retry(attempt) => {
                    let hint = err.retry_after_secs();
                    let delay = self.config.retry.delay_with_hint(attempt, hint);
                    let delay = if hint.is_some() {
                        delay
                    } else {
                        self.config.retry.jittered(delay)
                    };
                    debug!(
                        subsystem = "parse",
                        component = "queue",
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(
                        subsystem = "parse",
                        component = "queue",
                        op = op_name,
                        attempt,
                        error = %err,
                        "giving up"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Claim the next dispatch slot, pushing the shared schedule
    /// forward by the minimum spacing. Slots are handed out in lock
    /// acquisition order.
    async fn reserve_dispatch_slot(&self) {
        let at = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let at = (*next).max(now);
            *next = at + self.config.min_dispatch_interval;
            at
        };
        sleep_until(at).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast_config() -> QueueConfig {
        QueueConfig {
            max_concurrent_requests: 2,
            min_dispatch_interval: Duration::ZERO,
            max_queue_depth: 64,
            retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 3),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_through() {
        let queue = RequestQueue::new(fast_config());
        let out = queue.submit("noop", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(out.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_bound() {
        let queue = Arc::new(RequestQueue::new(fast_config()));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let queue = queue.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit("probe", || {
                        let current = current.clone();
                        let peak = peak.clone();
                        async move {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(10)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, Error>(())
                        }
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_fast_fails() {
        let queue = Arc::new(RequestQueue::new(QueueConfig {
            max_concurrent_requests: 1,
            min_dispatch_interval: Duration::ZERO,
            max_queue_depth: 0,
            retry: RetryPolicy::default(),
        }));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let blocker = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let started = std::sync::Mutex::new(Some(started_tx));
                let release = std::sync::Mutex::new(Some(release_rx));
                queue
                    .submit("blocker", || {
                        let tx = started.lock().unwrap().take();
                        let rx = release.lock().unwrap().take();
                        async move {
                            if let Some(tx) = tx {
                                let _ = tx.send(());
                            }
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok::<_, Error>(())
                        }
                    })
                    .await
            })
        };

        started_rx.await.unwrap();

        let rejected = queue.submit("extra", || async { Ok::<_, Error>(()) }).await;
        match rejected {
            Err(Error::QueueFull(depth)) => assert_eq!(depth, 0),
            other => panic!("expected QueueFull, got {:?}", other),
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_retried_until_success() {
        let queue = RequestQueue::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts_op = attempts.clone();
        let out = queue
            .submit("flaky", move || {
                let attempts = attempts_op.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::UpstreamStatus {
                            status: 429,
                            message: "slow down".to_string(),
                            retry_after_secs: Some(1),
                        })
                    } else {
                        Ok("parsed".to_string())
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), "parsed");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_not_retried() {
        let queue = RequestQueue::new(fast_config());
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts_op = attempts.clone();
        let out: Result<()> = queue
            .submit("rejected", move || {
                let attempts = attempts_op.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::UpstreamStatus {
                        status: 422,
                        message: "unsupported document".to_string(),
                        retry_after_secs: None,
                    })
                }
            })
            .await;

        assert!(matches!(out, Err(Error::UpstreamStatus { status: 422, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted() {
        let mut config = fast_config();
        config.retry = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 2);
        let queue = RequestQueue::new(config);
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts_op = attempts.clone();
        let out: Result<()> = queue
            .submit("always-503", move || {
                let attempts = attempts_op.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::UpstreamStatus {
                        status: 503,
                        message: "unavailable".to_string(),
                        retry_after_secs: None,
                    })
                }
            })
            .await;

        assert!(matches!(out, Err(Error::UpstreamStatus { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_spacing_enforced() {
        let queue = RequestQueue::new(QueueConfig {
            max_concurrent_requests: 4,
            min_dispatch_interval: Duration::from_millis(100),
            max_queue_depth: 8,
            retry: RetryPolicy::default(),
        });

        let start = Instant::now();
        queue
            .submit("first", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        queue
            .submit("second", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();
        queue
            .submit("third", || async { Ok::<_, Error>(()) })
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
