use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::error::PixelError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle of a dispatched job.
#[derive(Debug)]
pub struct JobHandle {
    done: Receiver<()>,
}

impl JobHandle {
    fn completed() -> Self {
        let (sender, done) = bounded(1);
        let _ = sender.send(());
        Self { done }
    }

    /// Blocks until the job has run.
    pub fn wait(self) {
        let _ = self.done.recv();
    }

    pub fn is_finished(&self) -> bool {
        !self.done.is_empty()
    }
}

pub trait Executor: Send + Sync {
    fn spawn(&self, job: Job) -> Result<JobHandle, PixelError>;
}

fn run_job(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!("background job panicked");
    }
}

/// Runs jobs on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, job: Job) -> Result<JobHandle, PixelError> {
        run_job(job);
        Ok(JobHandle::completed())
    }
}

/// Fixed set of worker threads fed through a channel.
pub struct WorkerPool {
    sender: Option<Sender<(Job, Sender<()>)>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, PixelError> {
        let (sender, receiver) = unbounded::<(Job, Sender<()>)>();
        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("pixel-worker-{index}"))
                .spawn(move || {
                    for (job, done) in receiver {
                        run_job(job);
                        let _ = done.send(());
                    }
                })
                .map_err(|err| PixelError::Filesystem(format!("spawn worker: {err}")))?;
            workers.push(worker);
        }
        debug!("started {} workers", workers.len());
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for WorkerPool {
    fn spawn(&self, job: Job) -> Result<JobHandle, PixelError> {
        let (done_sender, done) = bounded(1);
        self.sender
            .as_ref()
            .ok_or_else(|| PixelError::ImportFailed("worker pool is shut down".to_string()))?
            .send((job, done_sender))
            .map_err(|_| PixelError::ImportFailed("worker pool is shut down".to_string()))?;
        Ok(JobHandle { done })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}
