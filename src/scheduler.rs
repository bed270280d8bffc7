//! The single-worker task scheduler.
//!
//! Every GPU and effect-engine call in the pipeline is affinitized to one
//! dedicated render thread. [`RenderScheduler`] owns that thread and a FIFO
//! queue of boxed jobs: [`enqueue`](RenderScheduler::enqueue) guarantees
//! exactly-once, in-order execution with no reentrancy from other threads.
//!
//! [`dispatch`](RenderScheduler::dispatch) adds the inline fast path: a job
//! submitted from the render thread itself runs immediately instead of
//! being queued, which is what lets a consumer read pixels from inside a
//! frame-ready callback without deadlocking against the very task that
//! invoked it.

use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO task queue drained by one dedicated worker thread.
pub struct RenderScheduler {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl RenderScheduler {
    /// Spawn the worker thread.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("peltast-render".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn render thread");
        let worker_id = worker.thread().id();
        Self {
            sender: Some(sender),
            worker: Some(worker),
            worker_id,
        }
    }

    /// True when the calling thread is the render thread.
    pub fn is_render_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Queue a job for in-order execution on the render thread.
    ///
    /// Jobs submitted after shutdown are silently discarded.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender
            && sender.send(Box::new(job)).is_err()
        {
            tracing::debug!("Render scheduler is shut down; job discarded");
        }
    }

    /// Run a job inline when already on the render thread, otherwise queue
    /// it.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.is_render_thread() {
            job();
        } else {
            self.enqueue(job);
        }
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain remaining jobs and
        // exit. When the scheduler itself is dropped by a teardown task on
        // the worker thread, joining would be a self-join; detach instead.
        self.sender.take();
        if let Some(worker) = self.worker.take()
            && !self.is_render_thread()
        {
            let _ = worker.join();
        }
    }
}
