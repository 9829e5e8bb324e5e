//! Work items and their priority classification.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The unit of fallible async work a caller hands to the pool.
///
/// A work item's closure runs at most once, on whichever worker the
/// scheduler selects it for, and receives a child [`CancellationToken`] it
/// may poll to cooperate with shutdown.
pub type WorkClosure =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Relative importance of a work item.
///
/// Declared low-to-high so the derived [`Ord`] makes `High` the greatest
/// value, which is how the scheduler breaks effective-weight ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkPriority {
    /// Background work; starved last, aged fastest.
    Low,
    /// Default priority for routine work.
    Normal,
    /// Latency-sensitive work.
    High,
}

impl WorkPriority {
    /// All priority levels, in ascending order. Adding a level means adding
    /// a variant here and a config weight field; the scheduler's selection
    /// loop itself needs no change since it walks this slice.
    pub const ALL: [WorkPriority; 3] = [WorkPriority::Low, WorkPriority::Normal, WorkPriority::High];

    /// Dense index into per-priority storage (queues, counters).
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for WorkPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkPriority::Low => "low",
            WorkPriority::Normal => "normal",
            WorkPriority::High => "high",
        };
        f.write_str(s)
    }
}

/// A single piece of work queued for execution.
pub struct WorkItem {
    id: Uuid,
    name: Option<String>,
    priority: WorkPriority,
    enqueued_at: DateTime<Utc>,
    closure: WorkClosure,
}

impl WorkItem {
    /// Build a new work item from an async closure.
    ///
    /// The closure is handed a child cancellation token at execution time;
    /// it should poll it for cooperative early exit but is not required to.
    pub fn new<F, Fut>(priority: WorkPriority, closure: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: WorkClosure = Box::new(move |cancel| Box::pin(closure(cancel)));
        Self {
            id: Uuid::new_v4(),
            name: None,
            priority,
            enqueued_at: Utc::now(),
            closure: boxed,
        }
    }

    /// Attach a human-readable name, surfaced in logs and to metrics sinks.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Unique identifier assigned at construction.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The name attached via [`WorkItem::with_name`], if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Priority this item was queued under.
    pub fn priority(&self) -> WorkPriority {
        self.priority
    }

    /// UTC timestamp this item was constructed at.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Consume the item, handing back its closure for execution.
    ///
    /// Only called once, by the worker that the scheduler selected this
    /// item for.
    pub(crate) fn into_closure(self) -> WorkClosure {
        self.closure
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_places_high_above_low() {
        assert!(WorkPriority::High > WorkPriority::Normal);
        assert!(WorkPriority::Normal > WorkPriority::Low);
    }

    #[test]
    fn index_is_dense_and_unique() {
        let indices: Vec<usize> = WorkPriority::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn closure_runs_and_receives_a_cancellation_token() {
        let item = WorkItem::new(WorkPriority::Normal, |cancel: CancellationToken| async move {
            assert!(!cancel.is_cancelled());
            Ok(())
        })
        .with_name("probe");
        assert_eq!(item.name(), Some("probe"));
        let closure = item.into_closure();
        closure(CancellationToken::new()).await.unwrap();
    }
}
