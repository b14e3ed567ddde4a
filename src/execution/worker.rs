//! The background worker: one thread, one job at a time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::{ImportError, ImportResult};

use super::Job;

/// Owned background thread that runs offloaded jobs.
///
/// Jobs arrive over a channel and own their input bytes. The thread also owns a rayon pool used
/// to project rows of large tables. Dropping the worker closes the channel and joins the thread.
pub(crate) struct Worker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(threads: Option<usize>) -> ImportResult<Self> {
        let n_threads = threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("metric-import-rows-{i}"))
            .build()
            .map_err(|e| ImportError::WorkerCrashed {
                message: format!("failed to build row pool: {e}"),
            })?;

        let (tx, rx) = mpsc::channel::<Job>();
        let thread = std::thread::Builder::new()
            .name("metric-import-worker".to_string())
            .spawn(move || serve(rx, pool))?;

        debug!(threads = n_threads, "started import worker");
        Ok(Self {
            jobs: Some(tx),
            thread: Some(thread),
        })
    }

    /// Hand `job` to the worker. Gives the job back if the worker thread is gone.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        match &self.jobs {
            Some(tx) => tx.send(job).map_err(|mpsc::SendError(job)| job),
            None => Err(job),
        }
    }
}

fn serve(rx: mpsc::Receiver<Job>, pool: ThreadPool) {
    for job in rx {
        // A panicking observer drops the job's event sender; the handle reports it as a crash.
        if panic::catch_unwind(AssertUnwindSafe(|| job.run(Some(&pool)))).is_err() {
            warn!("import job panicked outside the pipeline");
        }
    }
    debug!("import worker stopped");
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("import worker thread panicked");
            }
        }
    }
}
