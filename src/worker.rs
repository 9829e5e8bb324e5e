//! Individual worker lifecycle: spawn, run loop, cancel, join.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metrics::Telemetry;
use crate::scheduler::{FetchOutcome, Scheduler};

/// How long a worker sleeps before retrying after the scheduler reports no
/// work, to avoid a tight spin while still reacting quickly once work
/// arrives (the scheduler's own wait is cancellation-aware and re-entered
/// on the next loop iteration).
const EMPTY_RETRY_DELAY: Duration = Duration::from_millis(20);

/// A single worker's handle, owned exclusively by the management loop.
pub(crate) struct Worker {
    id: Uuid,
    cancel: CancellationToken,
    last_active: Arc<StdMutex<Instant>>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker task under `parent_cancel` and start running its loop.
    pub(crate) fn spawn(scheduler: Arc<Scheduler>, parent_cancel: &CancellationToken, telemetry: Telemetry) -> Self {
        let id = Uuid::new_v4();
        let cancel = parent_cancel.child_token();
        let last_active = Arc::new(StdMutex::new(Instant::now()));
        telemetry.worker_created(id);

        let handle = {
            let cancel = cancel.clone();
            let last_active = Arc::clone(&last_active);
            let telemetry = telemetry.clone();
            tokio::spawn(async move {
                worker_loop(id, scheduler, cancel, last_active, telemetry).await;
            })
        };

        Self { id, cancel, last_active, handle }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// How long since this worker last started or finished a work item.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_active.lock().expect("last_active mutex poisoned").elapsed()
    }

    /// Cancel the worker and wait for its loop to exit.
    pub(crate) async fn stop(self, telemetry: &Telemetry) {
        self.cancel.cancel();
        let _ = self.handle.await;
        telemetry.worker_destroyed(self.id);
    }
}

#[tracing::instrument(skip(scheduler, cancel, last_active, telemetry), fields(worker_id = %id))]
async fn worker_loop(
    id: Uuid,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
    last_active: Arc<StdMutex<Instant>>,
    telemetry: Telemetry,
) {
    tracing::debug!("worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match scheduler.fetch_next(&cancel).await {
            FetchOutcome::Cancelled => break,
            FetchOutcome::Empty => {
                tokio::time::sleep(EMPTY_RETRY_DELAY).await;
                continue;
            }
            FetchOutcome::Item(item) => {
                *last_active.lock().expect("last_active mutex poisoned") = Instant::now();
                let item_id = item.id();
                let priority = item.priority();
                let item_cancel = cancel.child_token();
                let closure = item.into_closure();

                let started = Instant::now();
                let outcome = AssertUnwindSafe(closure(item_cancel)).catch_unwind().await;
                let duration = started.elapsed();

                let succeeded = match &outcome {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        tracing::warn!(item_id = %item_id, error = %err, "work item returned an error");
                        false
                    }
                    Err(_) => {
                        tracing::warn!(item_id = %item_id, "work item panicked");
                        false
                    }
                };

                telemetry.task_completed(item_id, priority, duration, succeeded);
                *last_active.lock().expect("last_active mutex poisoned") = Instant::now();
            }
        }
    }
    tracing::debug!("worker stopped");
}
