//! Per-priority FIFO queues and the shared backlog counters the scheduler
//! and management loop read from.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::item::{WorkItem, WorkPriority};
use crate::metrics::Telemetry;

/// A point-in-time read of how many items are waiting per priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BacklogSnapshot {
    /// Items waiting on the high-priority queue.
    pub high: u64,
    /// Items waiting on the normal-priority queue.
    pub normal: u64,
    /// Items waiting on the low-priority queue.
    pub low: u64,
}

impl BacklogSnapshot {
    /// Sum across all priorities.
    pub fn total(&self) -> u64 {
        self.high + self.normal + self.low
    }
}

/// One unbounded FIFO channel per priority, plus the bookkeeping the
/// scheduler needs to compute each queue's aging bias without peeking.
pub struct PriorityQueueSet {
    senders: Vec<mpsc::UnboundedSender<WorkItem>>,
    receivers: Vec<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>,
    counters: Vec<AtomicI64>,
    // Enqueue time of the current head of each queue. Updated to `now` when
    // a queue transitions empty->non-empty, cleared when it drains back to
    // empty. Left unchanged across a dequeue that doesn't empty the queue:
    // that slightly overstates the new head's age rather than understating
    // it, which only ever makes the aging bias larger, never smaller.
    head_since: Vec<StdMutex<Option<Instant>>>,
    notify: Notify,
    telemetry: Telemetry,
}

impl PriorityQueueSet {
    pub(crate) fn new(telemetry: Telemetry) -> Self {
        let mut senders = Vec::with_capacity(WorkPriority::ALL.len());
        let mut receivers = Vec::with_capacity(WorkPriority::ALL.len());
        let mut counters = Vec::with_capacity(WorkPriority::ALL.len());
        let mut head_since = Vec::with_capacity(WorkPriority::ALL.len());
        for _ in WorkPriority::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(AsyncMutex::new(rx));
            counters.push(AtomicI64::new(0));
            head_since.push(StdMutex::new(None));
        }
        Self {
            senders,
            receivers,
            counters,
            head_since,
            notify: Notify::new(),
            telemetry,
        }
    }

    /// Push a work item onto its priority's queue, emitting `task_queued`
    /// first so that event always precedes the `task_dequeued`/
    /// `task_completed` pair a consumer might fire the instant the item
    /// becomes visible on the channel.
    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<(), LifecycleError> {
        let idx = item.priority().index();
        let was_empty = self.counters[idx].fetch_add(1, Ordering::SeqCst) == 0;
        if was_empty {
            *self.head_since[idx].lock().expect("head_since mutex poisoned") = Some(Instant::now());
        }
        self.telemetry.task_queued(item.id(), item.priority());
        self.senders[idx]
            .send(item)
            .map_err(|_| LifecycleError::NotRunning)?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Non-blocking: take the head of a priority's queue if one is waiting.
    pub(crate) async fn try_take(&self, priority: WorkPriority) -> Option<WorkItem> {
        let idx = priority.index();
        let mut rx = self.receivers[idx].lock().await;
        match rx.try_recv() {
            Ok(item) => {
                let remaining = self.counters[idx].fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining <= 0 {
                    *self.head_since[idx].lock().expect("head_since mutex poisoned") = None;
                }
                Some(item)
            }
            Err(_) => None,
        }
    }

    /// Seconds since the oldest still-waiting item on this priority arrived;
    /// zero if the queue is currently empty.
    pub(crate) fn age_seconds(&self, priority: WorkPriority) -> f64 {
        self.head_since[priority.index()]
            .lock()
            .expect("head_since mutex poisoned")
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Whether nothing is currently waiting on this priority.
    pub(crate) fn is_empty(&self, priority: WorkPriority) -> bool {
        self.counters[priority.index()].load(Ordering::SeqCst) <= 0
    }

    /// Suspend until something is enqueued on any priority, or `cancel`
    /// fires. Returns `true` if woken by an enqueue, `false` if cancelled.
    pub(crate) async fn wait_any(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.notify.notified() => true,
        }
    }

    /// Current backlog across all priorities.
    pub(crate) fn snapshot(&self) -> BacklogSnapshot {
        let read = |p: WorkPriority| self.counters[p.index()].load(Ordering::SeqCst).max(0) as u64;
        BacklogSnapshot {
            high: read(WorkPriority::High),
            normal: read(WorkPriority::Normal),
            low: read(WorkPriority::Low),
        }
    }
}
