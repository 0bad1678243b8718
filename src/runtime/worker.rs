//! Worker event loops
//!
//! A worker is one OS thread running a single-threaded tokio runtime. Every
//! source, sink and bridge records the worker it was created on and spawns
//! its background work there. Code running elsewhere that needs a consistent
//! view of an object dispatches a closure onto the owning worker instead of
//! reaching into its state.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Error returned when a worker can no longer run tasks
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} has shut down")]
    Gone(usize),
}

/// Cloneable handle to a worker event loop
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    handle: Handle,
}

impl Worker {
    /// Wrap the runtime the caller is running on
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self {
            id: 0,
            handle: Handle::current(),
        }
    }

    /// Worker number within its pool
    pub fn id(&self) -> usize {
        self.id
    }

    /// Runtime handle of this worker
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a task on this worker
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run `f` on this worker and wait for its result
    pub async fn dispatch<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.handle.spawn(async move {
            let _ = tx.send(f());
        });
        rx.await.map_err(|_| WorkerError::Gone(self.id))
    }
}

struct WorkerThread {
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

/// Fixed set of workers, handed out round-robin
pub struct WorkerPool {
    workers: Vec<Worker>,
    threads: Vec<WorkerThread>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Start `size` worker threads (at least one)
    pub fn new(size: usize) -> std::io::Result<Self> {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let mut threads = Vec::with_capacity(size);

        for id in 0..size {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let handle = runtime.handle().clone();
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

            let thread = thread::Builder::new()
                .name(format!("media-worker-{id}"))
                .spawn(move || {
                    runtime.block_on(async {
                        let _ = shutdown_rx.await;
                    });
                    tracing::debug!(worker = id, "Worker stopped");
                })?;

            workers.push(Worker { id, handle });
            threads.push(WorkerThread {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            });
        }

        tracing::info!(workers = size, "Worker pool started");

        Ok(Self {
            workers,
            threads,
            next: AtomicUsize::new(0),
        })
    }

    /// Single worker backed by the caller's runtime
    ///
    /// Used when embedding the hub in an existing runtime and in tests.
    pub fn current() -> Self {
        Self {
            workers: vec![Worker::current()],
            threads: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Next worker in round-robin order
    pub fn next_worker(&self) -> Worker {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.workers[n % self.workers.len()].clone()
    }

    /// Worker by number
    pub fn worker(&self, id: usize) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop every worker thread and wait for it to exit
    ///
    /// Blocks the calling thread; call it from outside the pool's workers.
    pub fn shutdown(mut self) {
        self.signal_shutdown();
        for worker in &mut self.threads {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn signal_shutdown(&mut self) {
        for worker in &mut self.threads {
            if let Some(tx) = worker.shutdown.take() {
                let _ = tx.send(());
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
