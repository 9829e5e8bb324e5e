//! Observation surface: a synchronous, trusted sink for pool events.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::item::WorkPriority;
use crate::queue::BacklogSnapshot;

/// Receives pool lifecycle events.
///
/// Calls are synchronous and happen inline on whichever worker or
/// management-loop task produced the event, so implementations must be
/// cheap and non-blocking; the default for every method is a no-op, so a
/// sink only needs to implement the events it cares about.
///
/// A sink that panics has that panic caught and logged; the event is
/// dropped but the pool keeps running.
pub trait MetricsSink: Send + Sync {
    /// A worker finished spawning and entered its run loop.
    fn worker_created(&self, worker_id: Uuid) {
        let _ = worker_id;
    }

    /// A worker's loop exited, after cancellation and join.
    fn worker_destroyed(&self, worker_id: Uuid) {
        let _ = worker_id;
    }

    /// A work item was accepted into a priority queue.
    fn task_queued(&self, item_id: Uuid, priority: WorkPriority) {
        let _ = (item_id, priority);
    }

    /// A work item was selected by the scheduler and handed to a worker.
    fn task_dequeued(&self, item_id: Uuid, priority: WorkPriority) {
        let _ = (item_id, priority);
    }

    /// A work item's closure finished running, successfully or not.
    fn task_completed(&self, item_id: Uuid, priority: WorkPriority, duration: Duration, succeeded: bool) {
        let _ = (item_id, priority, duration, succeeded);
    }

    /// The management loop changed the number of live workers.
    fn scale_event(&self, old_count: usize, new_count: usize) {
        let _ = (old_count, new_count);
    }

    /// The management loop sampled the current backlog.
    fn backlog_snapshot(&self, snapshot: BacklogSnapshot) {
        let _ = snapshot;
    }
}

/// A [`MetricsSink`] that discards every event; used when a pool is
/// constructed without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {}

/// Internal wrapper that isolates the pool from a misbehaving sink.
#[derive(Clone)]
pub(crate) struct Telemetry(Arc<dyn MetricsSink>);

impl Telemetry {
    pub(crate) fn new(sink: Option<Arc<dyn MetricsSink>>) -> Self {
        Telemetry(sink.unwrap_or_else(|| Arc::new(NullSink)))
    }

    pub(crate) fn worker_created(&self, worker_id: Uuid) {
        self.guard("worker_created", || self.0.worker_created(worker_id));
    }

    pub(crate) fn worker_destroyed(&self, worker_id: Uuid) {
        self.guard("worker_destroyed", || self.0.worker_destroyed(worker_id));
    }

    pub(crate) fn task_queued(&self, item_id: Uuid, priority: WorkPriority) {
        self.guard("task_queued", || self.0.task_queued(item_id, priority));
    }

    pub(crate) fn task_dequeued(&self, item_id: Uuid, priority: WorkPriority) {
        self.guard("task_dequeued", || self.0.task_dequeued(item_id, priority));
    }

    pub(crate) fn task_completed(&self, item_id: Uuid, priority: WorkPriority, duration: Duration, succeeded: bool) {
        self.guard("task_completed", || {
            self.0.task_completed(item_id, priority, duration, succeeded);
        });
    }

    pub(crate) fn scale_event(&self, old_count: usize, new_count: usize) {
        self.guard("scale_event", || self.0.scale_event(old_count, new_count));
    }

    pub(crate) fn backlog_snapshot(&self, snapshot: BacklogSnapshot) {
        self.guard("backlog_snapshot", || self.0.backlog_snapshot(snapshot));
    }

    fn guard(&self, event: &'static str, f: impl FnOnce() + std::panic::UnwindSafe) {
        if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::warn!(event, "metrics sink panicked; event dropped");
        }
    }
}
