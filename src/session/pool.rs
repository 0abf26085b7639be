//! Dedicated I/O worker threads.
//!
//! Each worker drains its own bounded queue in FIFO order. A request issued
//! from one of the pool's own threads is never queued; the caller runs it
//! inline instead, so a worker can never wait on itself.

use crate::error::{RedirectError, Result};
use crate::overlay::{ClientId, FsRequest};
use crate::session::engine::{Completion, Engine};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the pool owning the current thread, 0 for non-worker threads.
    static CURRENT_POOL: Cell<u64> = const { Cell::new(0) };
}

pub(crate) struct Job {
    pub client: ClientId,
    pub request: FsRequest,
    pub force_native: bool,
    pub completion: Completion,
}

/// A fixed set of plain OS threads, one bounded queue each.
///
/// Workers are not pinned to cores; placement is left to the host scheduler.
pub(crate) struct WorkerPool {
    id: u64,
    senders: RwLock<Vec<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(workers: usize, queue_capacity: usize, engine: Arc<Engine>) -> Result<Self> {
        if workers == 0 || queue_capacity == 0 {
            return Err(RedirectError::Session(
                "worker pool needs at least one worker and a non-empty queue".to_string(),
            ));
        }

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = bounded(queue_capacity);
            let engine = Arc::clone(&engine);
            let handle = std::thread::Builder::new()
                .name(format!("redirectfs-io-{}", index))
                .spawn(move || run_worker(id, rx, engine))?;
            senders.push(tx);
            handles.push(handle);
        }

        tracing::debug!("Started worker pool {} with {} threads", id, workers);
        Ok(WorkerPool {
            id,
            senders: RwLock::new(senders),
            workers: Mutex::new(handles),
        })
    }

    /// Whether the calling thread belongs to this pool.
    pub fn is_worker_thread(&self) -> bool {
        CURRENT_POOL.with(|current| current.get()) == self.id
    }

    pub fn worker_count(&self) -> usize {
        self.senders.read().len()
    }

    /// Queue a job, blocking while the chosen worker's queue is full.
    ///
    /// Hands the job back if the pool has been shut down.
    pub fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        // The lock is released before a possibly blocking send so shutdown
        // can always take it
        let sender = {
            let senders = self.senders.read();
            if senders.is_empty() {
                return Err(job);
            }
            // Same caller thread, same worker: keeps one thread's requests FIFO
            let index = fxhash::hash64(&std::thread::current().id()) as usize % senders.len();
            senders[index].clone()
        };
        sender.send(job).map_err(|e| e.0)
    }

    /// Let every worker finish what is already queued, then join them.
    ///
    /// Closing the queues is the stop signal: a worker exits once its queue
    /// is drained and disconnected. A submitter still blocked on a full
    /// queue holds its own sender, so its job is delivered before the
    /// worker exits.
    pub fn shutdown(&self) {
        drop(std::mem::take(&mut *self.senders.write()));

        let handles = std::mem::take(&mut *self.workers.lock());
        let count = handles.len();
        let current = std::thread::current().id();
        for handle in handles {
            // Shutdown issued from a worker: that worker exits on its own
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
        if count > 0 {
            tracing::debug!("Stopped worker pool {} ({} threads)", self.id, count);
        }
    }
}

fn run_worker(pool_id: u64, rx: Receiver<Job>, engine: Arc<Engine>) {
    CURRENT_POOL.with(|current| current.set(pool_id));
    tracing::trace!("Worker {:?} ready", std::thread::current().name());

    while let Ok(job) = rx.recv() {
        let name = job.request.name();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.execute_into(job.client, &job.request, job.force_native, job.completion)
        }));
        // The completion was dropped mid-unwind, so a blocked caller sees Cancelled
        if outcome.is_err() {
            tracing::error!("{} for client {} panicked on worker", name, job.client);
        }
    }
    tracing::trace!("Worker {:?} stopped", std::thread::current().name());
}
