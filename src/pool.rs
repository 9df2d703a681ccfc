//! Fixed-size worker pool draining a shared FIFO queue

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{panic_message, SchedulerError};

/// A unit of work accepted by the pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters shared between the pool and its workers
#[derive(Debug, Default)]
struct PoolStats {
    executed: AtomicUsize,
    panicked: AtomicUsize,
}

/// A fixed set of worker threads pulling jobs from one shared queue.
///
/// Jobs run at most once, in submission order per queue position. A panicking
/// job is caught and logged; its worker keeps serving the queue. Jobs may
/// submit further jobs while running.
pub struct ExecutorPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    stats: Arc<PoolStats>,
    size: usize,
}

impl ExecutorPool {
    /// Starts `worker_threads` workers.
    pub fn new(worker_threads: usize) -> Result<Self, SchedulerError> {
        if worker_threads == 0 {
            return Err(SchedulerError::InvalidThreadCount(worker_threads));
        }

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        let mut workers = Vec::with_capacity(worker_threads);
        for index in 0..worker_threads {
            let receiver = Arc::clone(&receiver);
            let stats = Arc::clone(&stats);
            let spawned = thread::Builder::new()
                .name(format!("task-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, stats));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Closing the channel lets the already started workers exit.
                    drop(tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::Spawn(e));
                }
            }
        }

        info!("Executor pool started with {} workers", worker_threads);
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker_ids: workers.iter().map(|h| h.thread().id()).collect(),
            workers: Mutex::new(workers),
            stats,
            size: worker_threads,
        })
    }

    /// Enqueues a job. Fails once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(job)).map_err(|_| SchedulerError::ShutDown),
            None => Err(SchedulerError::ShutDown),
        }
    }

    /// Whether the pool still accepts jobs
    pub fn is_accepting(&self) -> bool {
        lock(&self.sender).is_some()
    }

    /// Stops accepting jobs, lets workers drain the queue, and joins them.
    ///
    /// Every caller outside the pool returns only once the queue is drained,
    /// including callers that race an earlier shutdown. When called from one
    /// of the pool's own workers it only closes the pool; the workers exit
    /// once the queue is drained.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            debug!("Executor pool closed, draining queue");
        }
        if self.worker_ids.contains(&thread::current().id()) {
            return;
        }

        // Held across the joins so concurrent callers wait for the drain too
        let mut workers = lock(&self.workers);
        if workers.is_empty() {
            return;
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        info!(
            "Executor pool stopped ({} jobs executed, {} panicked)",
            self.executed_jobs(),
            self.panicked_jobs()
        );
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that ran to completion or panicked
    pub fn executed_jobs(&self) -> usize {
        self.stats.executed.load(Ordering::Relaxed)
    }

    /// Jobs whose panic was caught by a worker
    pub fn panicked_jobs(&self) -> usize {
        self.stats.panicked.load(Ordering::Relaxed)
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    index: usize,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    stats: Arc<PoolStats>,
) {
    debug!("Worker {} started", index);
    loop {
        // Only the lock holder waits on the channel; the guard is released
        // before the job runs.
        let job = lock(&receiver).blocking_recv();
        let Some(job) = job else { break };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                "Worker {} caught panic in job: {}",
                index,
                panic_message(payload.as_ref())
            );
        }
        stats.executed.fetch_add(1, Ordering::Relaxed);
    }
    debug!("Worker {} stopped", index);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
