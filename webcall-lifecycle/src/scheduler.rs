//! Scheduler Service
//!
//! Every timer in the lifecycle (delayed retries, lock expiry, watchdog
//! ticks) is a cancellable task spawned on the tokio runtime. Cancellation is
//! best effort: a task that already started keeps running, so the work it
//! posts must be re-validated by whoever receives it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Handle to a scheduled task
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Identifier assigned by the scheduler
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the task if it has not run yet
    pub fn cancel(&self) {
        trace!("Cancelling scheduled task {}", self.id);
        self.handle.abort();
    }

    /// Whether the task ran to completion or was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Delayed and periodic task execution on a tokio runtime
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    next_id: Arc<AtomicU64>,
}

impl Scheduler {
    /// Create a scheduler bound to the current tokio runtime
    ///
    /// Must be called from within a runtime context.
    pub fn current() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Create a scheduler bound to a specific runtime
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run `task` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!("Scheduling task {} in {:?}", id, delay);

        let handle = self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });

        ScheduledTask { id, handle }
    }

    /// Run `make_task()` every `period`, first run after one period, until
    /// a run returns `false`
    pub fn schedule_periodic<M, F>(&self, period: Duration, mut make_task: M) -> ScheduledTask
    where
        M: FnMut() -> F + Send + 'static,
        F: Future<Output = bool> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!("Scheduling periodic task {} every {:?}", id, period);

        let handle = self.runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !make_task().await {
                    trace!("Periodic task {} stopped itself", id);
                    break;
                }
            }
        });

        ScheduledTask { id, handle }
    }
}
