//! An auto-scaling priority worker pool.
//!
//! ```text
//!            enqueue(WorkItem)
//!                  |
//!                  v
//!         +-----------------+
//!         | PriorityQueueSet|  one FIFO channel per WorkPriority
//!         +-----------------+
//!                  ^
//!                  | fetch_next (weighted + aged selection)
//!                  |
//!   +--------+  +--------+  +--------+
//!   | Worker |  | Worker |  | Worker |  ...  N in [min_workers, max_workers]
//!   +--------+  +--------+  +--------+
//!         ^
//!         | spawn / reclaim on a timer
//!         |
//!   +----------------+
//!   | management loop|  samples backlog, scales out/in, owns the worker map
//!   +----------------+
//! ```
//!
//! The scheduler picks a priority by `base_weight + aging_bias`, where the
//! aging bias grows with how long a queue's head has been waiting. That
//! guarantees a sustained flood of high-priority work eventually yields to
//! older low-priority items instead of starving them outright.
//!
//! The management loop is the only task allowed to mutate the live worker
//! map; workers themselves only ever read their own idle timer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod item;
mod metrics;
mod pool;
mod queue;
mod scheduler;
mod worker;

pub use config::PoolConfig;
pub use error::{ConfigurationError, LifecycleError, PoolError, Result};
pub use item::{WorkClosure, WorkItem, WorkPriority};
pub use metrics::{MetricsSink, NullSink};
pub use pool::Pool;
pub use queue::BacklogSnapshot;

/// Re-exported so callers can construct the cancellation token a
/// [`WorkItem`] closure receives without taking a direct `tokio-util`
/// dependency themselves.
pub use tokio_util::sync::CancellationToken;
