//! The pool itself: lifecycle, enqueue, and the autoscaling management loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{LifecycleError, Result, TickError};
use crate::item::WorkItem;
use crate::metrics::{MetricsSink, Telemetry};
use crate::queue::{BacklogSnapshot, PriorityQueueSet};
use crate::scheduler::Scheduler;
use crate::worker::Worker;

const STATE_NOT_STARTED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

struct StopGate {
    handle: Option<JoinHandle<()>>,
    done: bool,
}

struct PoolInner {
    config: Arc<PoolConfig>,
    queues: Arc<PriorityQueueSet>,
    scheduler: Arc<Scheduler>,
    telemetry: Telemetry,
    root_cancel: CancellationToken,
    state: AtomicU8,
    stop_gate: AsyncMutex<StopGate>,
}

/// An auto-scaling priority worker pool.
///
/// Cloning a `Pool` is cheap and shares the same underlying queues, workers,
/// and lifecycle state — all handles refer to one pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Construct a pool. Nothing runs until [`Pool::start`] is called; the
    /// configuration is not validated until then either.
    pub fn new(config: PoolConfig, metrics: Option<Arc<dyn MetricsSink>>) -> Self {
        let config = Arc::new(config);
        let telemetry = Telemetry::new(metrics);
        let queues = Arc::new(PriorityQueueSet::new(telemetry.clone()));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&queues), Arc::clone(&config), telemetry.clone()));
        Self {
            inner: Arc::new(PoolInner {
                config,
                queues,
                scheduler,
                telemetry,
                root_cancel: CancellationToken::new(),
                state: AtomicU8::new(STATE_NOT_STARTED),
                stop_gate: AsyncMutex::new(StopGate { handle: None, done: false }),
            }),
        }
    }

    /// Validate the configuration, spawn the minimum worker count, and
    /// start the management loop. Safe to call once; calling it again
    /// returns [`LifecycleError::AlreadyStarted`].
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.inner.config.validate()?;

        self.inner
            .state
            .compare_exchange(STATE_NOT_STARTED, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| LifecycleError::AlreadyStarted)?;

        let mut workers = HashMap::new();
        for _ in 0..self.inner.config.min_workers {
            let worker = Worker::spawn(Arc::clone(&self.inner.scheduler), &self.inner.root_cancel, self.inner.telemetry.clone());
            workers.insert(worker.id(), worker);
        }
        tracing::info!(count = workers.len(), "pool started, minimum workers spawned");

        let handle = tokio::spawn(management_loop(Arc::clone(&self.inner), workers));
        let mut gate = self.inner.stop_gate.lock().await;
        gate.handle = Some(handle);
        Ok(())
    }

    /// Cancel the management loop and every worker, and wait for all of
    /// them to drain. Idempotent: concurrent or repeated calls all return
    /// only once the pool has fully stopped.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        if self
            .inner
            .state
            .compare_exchange(STATE_NOT_STARTED, STATE_STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!("stop called before start; nothing to drain");
            return;
        }
        self.inner.state.store(STATE_STOPPING, Ordering::SeqCst);
        self.inner.root_cancel.cancel();

        let mut gate = self.inner.stop_gate.lock().await;
        if !gate.done {
            if let Some(handle) = gate.handle.take() {
                let _ = handle.await;
            }
            gate.done = true;
        }
        drop(gate);
        self.inner.state.store(STATE_STOPPED, Ordering::SeqCst);
        tracing::info!("pool stopped");
    }

    /// Queue a work item. Rejected with [`LifecycleError::NotRunning`] if
    /// the pool has not been started, or is stopping or stopped.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id(), priority = %item.priority()))]
    pub fn enqueue(&self, item: WorkItem) -> Result<()> {
        if self.inner.state.load(Ordering::SeqCst) != STATE_RUNNING {
            tracing::debug!("enqueue rejected: pool is not running");
            return Err(LifecycleError::NotRunning.into());
        }
        self.inner.queues.enqueue(item).map_err(LifecycleError::from)?;
        tracing::debug!("item queued");
        Ok(())
    }

    /// Current backlog across all priorities. Always available, even
    /// before `start` (reads as all-zero).
    pub fn backlog_snapshot(&self) -> BacklogSnapshot {
        self.inner.queues.snapshot()
    }
}

async fn management_loop(inner: Arc<PoolInner>, mut workers: HashMap<Uuid, Worker>) {
    let mut ticker = tokio::time::interval(inner.config.management_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = inner.root_cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = run_management_tick(&inner, &mut workers).await {
                    tracing::warn!(error = %err, "management tick failed; continuing on next tick");
                }
            }
        }
    }

    tracing::info!(count = workers.len(), "pool stopping, draining workers");
    for (_, worker) in workers.drain() {
        worker.stop(&inner.telemetry).await;
    }
}

async fn run_management_tick(inner: &Arc<PoolInner>, workers: &mut HashMap<Uuid, Worker>) -> std::result::Result<(), TickError> {
    let fut = AssertUnwindSafe(run_management_tick_inner(inner, workers));
    match fut.catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(TickError::Internal("management tick panicked".to_string())),
    }
}

async fn run_management_tick_inner(inner: &Arc<PoolInner>, workers: &mut HashMap<Uuid, Worker>) -> std::result::Result<(), TickError> {
    let snapshot = inner.queues.snapshot();
    inner.telemetry.backlog_snapshot(snapshot);

    let current = workers.len();
    let desired = desired_worker_count(&inner.config, snapshot.total());

    if desired > current {
        scale_out(inner, workers, desired - current);
    } else if desired < current {
        scale_in(inner, workers, current - desired).await;
    }

    Ok(())
}

fn scale_out(inner: &Arc<PoolInner>, workers: &mut HashMap<Uuid, Worker>, wanted: usize) {
    let before = workers.len();
    let room = inner.config.max_workers.saturating_sub(before);
    let to_spawn = wanted.min(room);
    for _ in 0..to_spawn {
        let worker = Worker::spawn(Arc::clone(&inner.scheduler), &inner.root_cancel, inner.telemetry.clone());
        workers.insert(worker.id(), worker);
    }
    if to_spawn > 0 {
        inner.telemetry.scale_event(before, workers.len());
        tracing::info!(old = before, new = workers.len(), "scaled out");
    }
}

async fn scale_in(inner: &Arc<PoolInner>, workers: &mut HashMap<Uuid, Worker>, wanted: usize) {
    let before = workers.len();
    let floor = inner.config.min_workers;
    let max_reclaim = wanted.min(before.saturating_sub(floor));
    if max_reclaim == 0 {
        return;
    }

    let mut idle: Vec<(Uuid, std::time::Duration)> = workers
        .iter()
        .map(|(id, worker)| (*id, worker.idle_for()))
        .filter(|(_, idle_for)| *idle_for > inner.config.idle_timeout)
        .collect();
    idle.sort_by(|a, b| b.1.cmp(&a.1));

    let mut reclaimed = 0;
    for (id, _) in idle.into_iter().take(max_reclaim) {
        if let Some(worker) = workers.remove(&id) {
            worker.stop(&inner.telemetry).await;
            reclaimed += 1;
        }
    }

    if reclaimed > 0 {
        inner.telemetry.scale_event(before, workers.len());
        tracing::info!(old = before, new = workers.len(), "scaled in");
    }
}

/// `ceil(total_backlog / backlog_per_worker_scale_out)`, clamped to
/// `[min_workers, max_workers]`.
fn desired_worker_count(config: &PoolConfig, total_backlog: u64) -> usize {
    let divisor = config.backlog_per_worker_scale_out.max(1);
    let raw = total_backlog.div_ceil(divisor);
    (raw as usize).clamp(config.min_workers, config.max_workers.max(config.min_workers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::WorkPriority;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    #[test]
    fn desired_worker_count_respects_bounds() {
        let config = PoolConfig::default().with_min_workers(1).with_max_workers(4).with_backlog_per_worker_scale_out(4);
        assert_eq!(desired_worker_count(&config, 0), 1);
        assert_eq!(desired_worker_count(&config, 5), 2);
        assert_eq!(desired_worker_count(&config, 1000), 4);
    }

    #[tokio::test]
    async fn enqueue_before_start_is_rejected() {
        let pool = Pool::new(PoolConfig::default(), None);
        let err = pool.enqueue(WorkItem::new(WorkPriority::Normal, |_| async { Ok(()) })).unwrap_err();
        assert!(matches!(err, crate::error::PoolError::Lifecycle(LifecycleError::NotRunning)));
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let pool = Pool::new(PoolConfig::default().with_min_workers(0), None);
        pool.start().await.unwrap();
        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, crate::error::PoolError::Lifecycle(LifecycleError::AlreadyStarted)));
        pool.stop().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_start() {
        let pool = Pool::new(PoolConfig::default().with_min_workers(4).with_max_workers(1), None);
        assert!(pool.start().await.is_err());
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_rejected() {
        let pool = Pool::new(PoolConfig::default().with_min_workers(0), None);
        pool.start().await.unwrap();
        pool.stop().await;
        let err = pool.enqueue(WorkItem::new(WorkPriority::Normal, |_| async { Ok(()) })).unwrap_err();
        assert!(matches!(err, crate::error::PoolError::Lifecycle(LifecycleError::NotRunning)));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_safe_no_op() {
        let pool = Pool::new(PoolConfig::default(), None);
        tokio::time::timeout(Duration::from_secs(1), pool.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_stop_calls_all_return_after_full_drain() {
        let pool = Pool::new(PoolConfig::default().with_min_workers(1), None);
        pool.start().await.unwrap();
        let a = pool.clone();
        let b = pool.clone();
        let (ra, rb) = tokio::join!(a.stop(), b.stop());
        let _ = (ra, rb);
    }

    #[tokio::test]
    async fn pool_executes_enqueued_work() {
        let pool = Pool::new(PoolConfig::default().with_min_workers(1), None);
        pool.start().await.unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let completed = completed.clone();
            pool.enqueue(WorkItem::new(WorkPriority::Normal, move |_| {
                let completed = completed.clone();
                async move {
                    completed.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            }))
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(AtomicOrdering::SeqCst), 5);
        assert_eq!(pool.backlog_snapshot().total(), 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn management_loop_scales_out_under_backlog() {
        let pool = Pool::new(
            PoolConfig::default()
                .with_min_workers(1)
                .with_max_workers(4)
                .with_backlog_per_worker_scale_out(1)
                .with_management_interval(Duration::from_millis(10)),
            None,
        );
        pool.start().await.unwrap();

        let gate = Arc::new(tokio::sync::Notify::new());
        for _ in 0..4 {
            let gate = gate.clone();
            pool.enqueue(WorkItem::new(WorkPriority::Normal, move |_| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(())
                }
            }))
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.notify_waiters();
        pool.stop().await;
    }
}
