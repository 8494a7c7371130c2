//! Fixed-size worker pool for backup jobs.
//!
//! Each job runs start to finish on one worker thread, including any time
//! spent paused. Submissions beyond the pool size wait in an unbounded queue.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error};

use crate::error::EngineError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` named worker threads.
    pub fn new(size: usize) -> Result<Self, EngineError> {
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("backup-worker-{}", index))
                .spawn(move || worker_loop(index, receiver))
                .map_err(|e| EngineError::WorkerSpawnFailed { source: e })?;
            workers.push(handle);
        }

        Ok(WorkerPool {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job.
    ///
    /// # Errors
    /// `EngineError::ShuttingDown` if no worker can take it any more.
    pub fn execute<F>(&self, job: F) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(EngineError::ShuttingDown)?;
        sender
            .send(Box::new(job))
            .map_err(|_| EngineError::ShuttingDown)
    }
}

impl Drop for WorkerPool {
    /// Close the queue, let workers drain it, then join them.
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("backup worker exited abnormally");
            }
        }
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    debug!(worker = index, "backup worker started");
    for job in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(worker = index, "backup job panicked");
        }
    }
    debug!(worker = index, "backup worker stopped");
}
