//! Shutdown barrier for fire-and-forget work
//!
//! Every object that spawns background work (drain loops, idle timers,
//! translation) owns a `WaitGroup`. Its close path cancels the work first and
//! then waits here until the in-flight count returns to zero, so no task can
//! touch state that is being released.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use super::worker::Worker;

/// Counts in-flight tasks and lets a closer wait for them
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    tracker: TaskTracker,
    // Waiters take turns so one cannot reopen the tracker under another
    waiters: Arc<Mutex<()>>,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` on `worker`, counting it until it completes
    pub fn spawn_on<F>(&self, worker: &Worker, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(future, worker.handle())
    }

    /// Count a unit of work that is not a spawned task
    ///
    /// The count drops when the returned token is dropped.
    pub fn add(&self) -> TaskTrackerToken {
        self.tracker.token()
    }

    /// Number of units currently in flight
    pub fn count(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every counted unit has finished
    ///
    /// Work started while waiting is waited for as well. The group stays
    /// usable afterwards. Concurrent waiters are served one at a time.
    pub async fn wait(&self) {
        let _turn = self.waiters.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
