//! Three-level priority scheduler: admission control, per-priority worker
//! pools, and concurrent gather.
//!
//! Grounded on `evox/core/queue.py`'s `PriorityAwareQueue`: one FIFO queue
//! per priority level, a fixed set of workers started per level at
//! construction time (strict isolation — a HIGH worker never drains a LOW
//! queue), `put_nowait`-style non-blocking admission, and a bounded rolling
//! error log in the stats. The worker-pool shape is semaphore-adjacent but
//! deliberately not semaphore-gated: workers here are persistent tasks
//! pulling from a channel rather than permits acquired per call, since a
//! fixed number of concurrently-running workers per priority is wanted
//! rather than a ceiling on ad-hoc concurrent calls.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Notify, Semaphore};

use crate::config::{PriorityLimits, SchedulerConfig};
use crate::error::CoreError;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    fn idx(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

enum JobOutcome<T> {
    Value(T),
    TimedOut { elapsed: Duration, timeout: Duration },
    Cancelled,
}

struct QueuedJob {
    run: Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>,
}

/// Handle returned by [`Scheduler::submit`]. Awaiting `wait` blocks until
/// the job is dispatched and completes (or is timed out / cancelled).
pub struct SubmittedRequest<T> {
    result_rx: oneshot::Receiver<JobOutcome<T>>,
    cancel_flag: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
}

impl<T> SubmittedRequest<T> {
    /// Cancels the request: if not yet dispatched, the worker skips it
    /// entirely; if already running, the operation's future is dropped
    /// best-effort at its next await point.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Release);
        self.cancel_notify.notify_one();
    }

    pub async fn wait(self) -> Result<T, CoreError<std::convert::Infallible>> {
        match self.result_rx.await {
            Ok(JobOutcome::Value(v)) => Ok(v),
            Ok(JobOutcome::TimedOut { elapsed, timeout }) => Err(CoreError::Timeout { elapsed, timeout }),
            Ok(JobOutcome::Cancelled) => Err(CoreError::Cancelled),
            Err(_) => Err(CoreError::Cancelled),
        }
    }
}

/// Bounded rolling log, FIFO eviction at `MAX_ERROR_LOG_ENTRIES`.
const MAX_ERROR_LOG_ENTRIES: usize = 100;

#[derive(Default)]
struct PriorityStatsInner {
    admitted: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    active_workers: AtomicUsize,
    errors: Mutex<VecDeque<String>>,
}

impl PriorityStatsInner {
    fn record_error(&self, detail: String) {
        let mut errors = self.errors.lock().expect("scheduler stats mutex poisoned");
        if errors.len() >= MAX_ERROR_LOG_ENTRIES {
            errors.pop_front();
        }
        errors.push_back(detail);
    }
}

#[derive(Debug, Clone)]
pub struct PriorityStats {
    pub queue_len: usize,
    pub active_workers: usize,
    pub admitted_total: u64,
    pub rejected_total: u64,
    pub processed_total: u64,
    pub recent_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub high: PriorityStats,
    pub medium: PriorityStats,
    pub low: PriorityStats,
}

struct PriorityQueue {
    sender: mpsc::Sender<QueuedJob>,
    stats: Arc<PriorityStatsInner>,
    limit: usize,
}

impl PriorityQueue {
    fn spawn(priority: Priority, queue_limit: usize, concurrency: usize, shutdown: Arc<AtomicBool>) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(queue_limit.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let stats = Arc::new(PriorityStatsInner::default());

        for worker_id in 0..concurrency {
            let receiver = receiver.clone();
            let stats = stats.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    if shutdown.load(Ordering::Acquire) {
                        continue;
                    }
                    stats.active_workers.fetch_add(1, Ordering::AcqRel);
                    (job.run)().await;
                    stats.active_workers.fetch_sub(1, Ordering::AcqRel);
                    stats.processed.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!(priority = priority.as_str(), worker_id, "scheduler worker exiting");
            });
        }

        Self { sender, stats, limit: queue_limit }
    }

    fn snapshot(&self) -> PriorityStats {
        PriorityStats {
            queue_len: self.sender.max_capacity() - self.sender.capacity(),
            active_workers: self.stats.active_workers.load(Ordering::Acquire),
            admitted_total: self.stats.admitted.load(Ordering::Relaxed),
            rejected_total: self.stats.rejected.load(Ordering::Relaxed),
            processed_total: self.stats.processed.load(Ordering::Relaxed),
            recent_errors: self.stats.errors.lock().expect("scheduler stats mutex poisoned").iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum GatherPolicy {
    PartialOk,
    AllOrNothing,
}

/// Three independent priority queues, each with its own fixed worker pool.
pub struct Scheduler {
    queues: [PriorityQueue; 3],
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let limits_for = |p: Priority, limits: &PriorityLimits| match p {
            Priority::High => limits.high,
            Priority::Medium => limits.medium,
            Priority::Low => limits.low,
        };
        let queues = [
            PriorityQueue::spawn(
                Priority::High,
                limits_for(Priority::High, &config.queue_limits),
                limits_for(Priority::High, &config.concurrency_limits),
                shutdown.clone(),
            ),
            PriorityQueue::spawn(
                Priority::Medium,
                limits_for(Priority::Medium, &config.queue_limits),
                limits_for(Priority::Medium, &config.concurrency_limits),
                shutdown.clone(),
            ),
            PriorityQueue::spawn(
                Priority::Low,
                limits_for(Priority::Low, &config.queue_limits),
                limits_for(Priority::Low, &config.concurrency_limits),
                shutdown.clone(),
            ),
        ];
        Self { queues, shutdown }
    }

    /// Submits `f` to run on a `priority` worker with an optional deadline.
    /// Fails fast with `QueueFull` if that priority's queue is at capacity;
    /// never blocks.
    pub fn submit<T, F, Fut>(
        &self,
        priority: Priority,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<SubmittedRequest<T>, CoreError<std::convert::Infallible>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let queue = &self.queues[priority.idx()];
        let (tx, rx) = oneshot::channel::<JobOutcome<T>>();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel_notify = Arc::new(Notify::new());

        let job_cancel_flag = cancel_flag.clone();
        let job_cancel_notify = cancel_notify.clone();
        let job = QueuedJob {
            run: Box::new(move || {
                Box::pin(async move {
                    if job_cancel_flag.load(Ordering::Acquire) {
                        let _ = tx.send(JobOutcome::Cancelled);
                        return;
                    }
                    let started = Instant::now();
                    let race = async {
                        tokio::select! {
                            result = f() => JobOutcome::Value(result),
                            _ = job_cancel_notify.notified() => JobOutcome::Cancelled,
                        }
                    };
                    let outcome = match timeout {
                        Some(d) => match tokio::time::timeout(d, race).await {
                            Ok(o) => o,
                            Err(_) => JobOutcome::TimedOut { elapsed: started.elapsed(), timeout: d },
                        },
                        None => race.await,
                    };
                    let _ = tx.send(outcome);
                })
            }),
        };

        match queue.sender.try_send(job) {
            Ok(()) => {
                queue.stats.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(SubmittedRequest { result_rx: rx, cancel_flag, cancel_notify })
            }
            Err(_) => {
                queue.stats.rejected.fetch_add(1, Ordering::Relaxed);
                queue.stats.record_error(format!("queue full at priority {}", priority.as_str()));
                Err(CoreError::QueueFull { priority: priority.as_str(), limit: queue.limit })
            }
        }
    }

    /// Concurrently runs `items` at `priority`, bounding in-flight work to
    /// `concurrency`. `policy` selects whether a single failure cancels the
    /// rest (`AllOrNothing`) or each item's outcome is reported
    /// independently, index-aligned with the input (`PartialOk`).
    pub async fn gather<T, F, Fut>(
        &self,
        items: Vec<F>,
        priority: Priority,
        concurrency: usize,
        policy: GatherPolicy,
    ) -> Vec<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permits = permits.clone();
            let cancelled = cancelled.clone();
            let submitted = self.submit(priority, None, item);
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                if matches!(policy, GatherPolicy::AllOrNothing) && cancelled.load(Ordering::Acquire) {
                    return None;
                }
                match submitted {
                    Ok(req) => match req.wait().await {
                        Ok(v) => Some(v),
                        Err(_) => {
                            if matches!(policy, GatherPolicy::AllOrNothing) {
                                cancelled.store(true, Ordering::Release);
                            }
                            None
                        }
                    },
                    Err(_) => {
                        if matches!(policy, GatherPolicy::AllOrNothing) {
                            cancelled.store(true, Ordering::Release);
                        }
                        None
                    }
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or(None));
        }
        results
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            high: self.queues[Priority::High.idx()].snapshot(),
            medium: self.queues[Priority::Medium.idx()].snapshot(),
            low: self.queues[Priority::Low.idx()].snapshot(),
        }
    }

    /// Stops admitting new work. Workers finish their in-flight job and
    /// then exit once the channel drains; already-queued jobs are skipped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler_with(high: usize, medium: usize, low: usize, high_q: usize) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            queue_limits: PriorityLimits { high: high_q, medium: 100, low: 200 },
            concurrency_limits: PriorityLimits { high, medium, low },
        })
    }

    #[tokio::test]
    async fn submit_runs_and_returns_value() {
        let scheduler = scheduler_with(1, 1, 1, 10);
        let req = scheduler.submit(Priority::High, None, || async { 42 }).unwrap();
        assert_eq!(req.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn queue_full_rejects_admission() {
        let scheduler = scheduler_with(1, 1, 1, 2);
        let block = Arc::new(tokio::sync::Notify::new());

        let b1 = block.clone();
        let _r1 = scheduler.submit(Priority::High, None, move || async move {
            b1.notified().await;
        });
        let b2 = block.clone();
        let _r2 = scheduler.submit(Priority::High, None, move || async move {
            b2.notified().await;
        });
        // r1 is dispatched immediately (1 worker), occupying the worker;
        // r2 sits in queue (capacity 2): admitted. A third must be rejected.
        let r3 = scheduler.submit(Priority::High, None, || async { 1 });
        assert!(r3.is_err());
        assert!(r3.unwrap_err().is_queue_full());
        block.notify_waiters();
    }

    #[tokio::test]
    async fn timeout_resolves_with_timeout_error() {
        let scheduler = scheduler_with(1, 1, 1, 10);
        let req = scheduler
            .submit(Priority::High, Some(Duration::from_millis(20)), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                1
            })
            .unwrap();
        let result = req.wait().await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn cancel_before_dispatch_resolves_with_cancelled() {
        let scheduler = scheduler_with(1, 1, 1, 10);
        let blocker = Arc::new(tokio::sync::Notify::new());
        let b = blocker.clone();
        let _occupy = scheduler.submit(Priority::High, None, move || async move {
            b.notified().await;
        });

        let req = scheduler.submit(Priority::High, None, || async { 99 }).unwrap();
        req.cancel();
        let result = req.wait().await;
        assert!(result.unwrap_err().is_cancelled());
        blocker.notify_waiters();
    }

    #[tokio::test]
    async fn gather_partial_ok_preserves_order() {
        let scheduler = scheduler_with(4, 4, 4, 50);
        let items: Vec<_> = (0..4).map(|i| move || async move { i }).collect();
        let results = scheduler.gather(items, Priority::Medium, 2, GatherPolicy::PartialOk).await;
        assert_eq!(results, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn gather_all_or_nothing_drops_remaining_after_a_rejection() {
        let scheduler = scheduler_with(4, 4, 4, 1);
        // Fill the high-priority queue so later submissions inside gather
        // are rejected with QueueFull, exercising the all-or-nothing path.
        let blocker = Arc::new(tokio::sync::Notify::new());
        let b = blocker.clone();
        let _occupy = scheduler.submit(Priority::High, None, move || async move {
            b.notified().await;
        });

        let items: Vec<_> = (0..4).map(|i| move || async move { i }).collect();
        let results = scheduler.gather(items, Priority::High, 4, GatherPolicy::AllOrNothing).await;
        assert!(results.iter().any(|r| r.is_none()));
        blocker.notify_waiters();
    }

    #[tokio::test]
    async fn stats_reflect_admitted_and_processed_counts() {
        let scheduler = scheduler_with(2, 2, 2, 10);
        for _ in 0..3 {
            scheduler.submit(Priority::Low, None, || async { 1 }).unwrap().wait().await.unwrap();
        }
        let stats = scheduler.stats();
        assert_eq!(stats.low.admitted_total, 3);
        assert_eq!(stats.low.processed_total, 3);
    }
}
