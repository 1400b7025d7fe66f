//! Background thread pool for slide resolution and cache warming.
//!
//! Jobs are closures pushed through a crossbeam MPMC channel. The epoch
//! counter lets the presenter invalidate queued jobs in bulk: a job enqueued
//! with `execute_with_epoch` is skipped at pickup time if the epoch moved on.

use crossbeam_channel::{Sender, unbounded};
use log::{debug, error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool shared by the presenter's resolution and warming jobs.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(2);
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || resolve_slide(url));
/// workers.bump_epoch(); // queued job above is now skipped
/// ```
pub struct Workers {
    sender: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
}

impl Workers {
    /// Create pool with `num_threads` threads (at least one).
    pub fn new(num_threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::new();

        for worker_id in 0..num_threads.max(1) {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("presto-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        debug!("Workers initialized: {} threads", handles.len());

        Self {
            sender: Some(tx),
            handles,
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live worker threads
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Execute closure on a worker thread.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(Box::new(f)) {
            error!("Failed to enqueue job: {}", e);
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Increment epoch and return the new value.
    ///
    /// Every job enqueued under an older epoch that has not started yet is dropped.
    pub fn bump_epoch(&self) -> u64 {
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Epoch incremented: {}", epoch);
        epoch
    }

    /// Execute closure only if `epoch` is still current when a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            let current = current_epoch.load(Ordering::SeqCst);
            if current == epoch {
                f();
            } else {
                trace!("Skipping stale job: epoch {} != current {}", epoch, current);
            }
        });
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Closing the channel ends every worker's recv() loop
        self.sender.take();
        self.bump_epoch();

        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    debug!("Worker shutdown timeout, detaching remaining threads");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
    }
}
