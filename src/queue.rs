//! Background request queue (spec.md §9 design note: the cache-file
//! transaction variant hands the remainder of a download off to a
//! worker rather than blocking the calling thread).
//!
//! Grounded on the teacher's `transfer::parallel` worker-pool shape: a
//! bounded channel drained by a fixed set of OS threads, no async
//! runtime.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// External contract: hand a finisher closure off to run in the
/// background. Exists as a trait so tests can run jobs inline instead
/// of spinning real threads.
pub trait RequestQueue: Send + Sync {
    fn enqueue_download(&self, job: Job);
}

/// Fixed pool of worker threads draining a bounded `mpsc` channel,
/// sized to match the stream slot pool (spec.md §4.D: concurrency is
/// bounded by `N+1` slots, so the queue never needs more workers than
/// that to keep every in-flight download serviced).
pub struct ThreadPoolQueue {
    sender: Option<Sender<Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPoolQueue {
    pub fn new(worker_threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(worker_threads);
        for i in 0..worker_threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let handle = std::thread::Builder::new()
                .name(format!("webdavfs-download-{i}"))
                .spawn(move || run_worker(receiver))
                .expect("spawning download worker thread");
            workers.push(handle);
        }
        Self { sender: Some(sender), workers: Mutex::new(workers) }
    }
}

fn run_worker(receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let rx = receiver.lock().expect("download queue receiver mutex poisoned");
            rx.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break, // sender dropped, queue shutting down
        }
    }
}

impl RequestQueue for ThreadPoolQueue {
    fn enqueue_download(&self, job: Job) {
        // A send failing here means every worker thread has panicked and
        // exited; there is nothing more useful to do than drop the job.
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }
}

impl Drop for ThreadPoolQueue {
    fn drop(&mut self) {
        // Drop the sender first so every worker's blocking `recv()` sees
        // the channel close and returns; only then join, or this would
        // deadlock waiting on threads that are still blocked in `recv()`.
        self.sender.take();
        let mut workers = self.workers.lock().expect("download queue workers mutex poisoned");
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Runs every job synchronously on the calling thread. Used by tests
/// that want deterministic ordering instead of a real background hop.
pub struct InlineQueue;

impl RequestQueue for InlineQueue {
    fn enqueue_download(&self, job: Job) {
        job();
    }
}
