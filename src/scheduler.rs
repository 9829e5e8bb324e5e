//! Weighted fair-share selection with aging, so a sustained flood of
//! high-priority work cannot starve lower priorities indefinitely.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::item::{WorkItem, WorkPriority};
use crate::metrics::Telemetry;
use crate::queue::PriorityQueueSet;

/// Result of asking the scheduler for the next item to run.
pub(crate) enum FetchOutcome {
    /// An item was selected; the counter for its priority has already been
    /// decremented and a `task_dequeued` event already emitted.
    Item(WorkItem),
    /// Nothing was waiting after one non-blocking pass and one wait-and-retry.
    /// The caller should back off briefly and call again.
    Empty,
    /// The supplied cancellation token fired while waiting.
    Cancelled,
}

/// Picks the next [`WorkItem`] to run out of the shared [`PriorityQueueSet`].
pub(crate) struct Scheduler {
    queues: Arc<PriorityQueueSet>,
    config: Arc<PoolConfig>,
    telemetry: Telemetry,
}

impl Scheduler {
    pub(crate) fn new(queues: Arc<PriorityQueueSet>, config: Arc<PoolConfig>, telemetry: Telemetry) -> Self {
        Self { queues, config, telemetry }
    }

    /// Select the next item to run, waiting for new work if none is ready.
    ///
    /// Two-phase: an immediate non-blocking pass over all priorities in
    /// weight order, and if that finds nothing, one wait for a wakeup
    /// followed by a single retry of the same pass. This keeps the common
    /// case (something already waiting) allocation-light and avoids
    /// spinning when the pool is idle.
    pub(crate) async fn fetch_next(&self, cancel: &CancellationToken) -> FetchOutcome {
        if let Some(item) = self.try_select().await {
            return FetchOutcome::Item(item);
        }
        if !self.queues.wait_any(cancel).await {
            return FetchOutcome::Cancelled;
        }
        match self.try_select().await {
            Some(item) => FetchOutcome::Item(item),
            None => FetchOutcome::Empty,
        }
    }

    async fn try_select(&self) -> Option<WorkItem> {
        for priority in self.priority_order() {
            if let Some(item) = self.queues.try_take(priority).await {
                self.telemetry.task_dequeued(item.id(), priority);
                return Some(item);
            }
        }
        None
    }

    /// Priorities ordered by descending effective weight, ties broken by
    /// natural priority order (`High` first).
    fn priority_order(&self) -> Vec<WorkPriority> {
        let mut order: Vec<WorkPriority> = WorkPriority::ALL.to_vec();
        order.sort_by(|a, b| {
            let weight_a = self.effective_weight(*a);
            let weight_b = self.effective_weight(*b);
            weight_b
                .partial_cmp(&weight_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.cmp(a))
        });
        order
    }

    /// `base_weight + aging_bias`, where the aging bias is zero for an
    /// empty queue and otherwise grows linearly with how long its head has
    /// been waiting, scaled by `aging_factor`.
    fn effective_weight(&self, priority: WorkPriority) -> f64 {
        let base = self.config.weight_for(priority);
        if self.queues.is_empty(priority) {
            return base;
        }
        base + self.config.aging_factor * self.queues.age_seconds(priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Telemetry;

    fn scheduler(config: PoolConfig) -> Scheduler {
        Scheduler::new(
            Arc::new(PriorityQueueSet::new(Telemetry::new(None))),
            Arc::new(config),
            Telemetry::new(None),
        )
    }

    fn item(priority: WorkPriority) -> WorkItem {
        WorkItem::new(priority, |_| async { Ok(()) })
    }

    #[tokio::test]
    async fn picks_the_only_ready_priority() {
        let sched = scheduler(PoolConfig::default());
        sched.queues.enqueue(item(WorkPriority::Low)).unwrap();
        match sched.try_select().await {
            Some(taken) => assert_eq!(taken.priority(), WorkPriority::Low),
            None => panic!("expected an item"),
        }
    }

    #[tokio::test]
    async fn higher_base_weight_wins_when_all_queues_are_fresh() {
        let sched = scheduler(PoolConfig::default());
        sched.queues.enqueue(item(WorkPriority::Low)).unwrap();
        sched.queues.enqueue(item(WorkPriority::High)).unwrap();
        let taken = sched.try_select().await.unwrap();
        assert_eq!(taken.priority(), WorkPriority::High);
    }

    #[tokio::test]
    async fn aging_eventually_overrides_a_starved_low_priority_queue() {
        // A huge aging factor makes even a few milliseconds of waiting
        // dominate the base-weight gap between Low and High.
        let config = PoolConfig::default().with_aging_factor(1_000_000.0);
        let sched = scheduler(config);
        sched.queues.enqueue(item(WorkPriority::Low)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        sched.queues.enqueue(item(WorkPriority::High)).unwrap();
        let taken = sched.try_select().await.unwrap();
        assert_eq!(taken.priority(), WorkPriority::Low);
    }

    #[tokio::test]
    async fn empty_queue_set_yields_nothing_without_waiting() {
        let sched = scheduler(PoolConfig::default());
        assert!(sched.try_select().await.is_none());
    }
}
