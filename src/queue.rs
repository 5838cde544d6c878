//! Snapshot dispatch: worker threads answering over one-shot channels.

use crate::definition::TestId;
use crate::snapshot::{SnapshotOptions, Snapshotter};
use crate::{Error, Result};
use image::RgbaImage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::{oneshot, watch};

/// Reply channel for a single snapshot job.
pub type JobReceiver = oneshot::Receiver<Result<RgbaImage>>;

struct Job {
    id: TestId,
    options: SnapshotOptions,
    resp: oneshot::Sender<Result<RgbaImage>>,
}

/// Stops a render run: pending jobs are answered with `Error::Cancelled` and
/// the snapshotter is asked to abort in-flight work.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
    snapshotter: Arc<dyn Snapshotter>,
}

impl CancelHandle {
    pub fn new(snapshotter: Arc<dyn Snapshotter>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
            snapshotter,
        }
    }

    pub fn cancel(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("cancelling render run");
        self.snapshotter.cancel();
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Snapshot dispatch backed by dedicated worker threads.
///
/// The worker threads share one `Snapshotter` and execute jobs sent from
/// async tasks, so callers can await results without the snapshotter's
/// blocking work running on the async runtime.
pub struct SnapshotQueue {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelHandle,
}

impl SnapshotQueue {
    /// Spawn `workers` threads (at least one) driving `snapshotter`.
    pub fn new(snapshotter: Arc<dyn Snapshotter>, workers: usize, cancel: CancelHandle) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("snapshot queue needs at least one worker".to_string()));
        }

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = job_rx.clone();
            let snapshotter = snapshotter.clone();
            let cancel = cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("snapshot-worker-{}", index))
                .spawn(move || worker_loop(rx, snapshotter, cancel))
                .map_err(|e| Error::Other(format!("failed to spawn snapshot worker: {}", e)))?;
            handles.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            workers: handles,
            cancel,
        })
    }

    /// Queue a job. The returned receiver yields the bitmap or the error.
    pub fn submit(&self, id: TestId, options: SnapshotOptions) -> JobReceiver {
        let (tx, rx) = oneshot::channel();
        log::debug!("dispatching {} ({}x{})", id, options.width, options.height);
        let job = Job { id, options, resp: tx };
        match &self.job_tx {
            Some(job_tx) => {
                if let Err(mpsc::SendError(job)) = job_tx.send(job) {
                    let _ = job.resp.send(Err(Error::Other("snapshot workers exited".to_string())));
                }
            }
            None => {
                let _ = job.resp.send(Err(Error::Other("snapshot queue closed".to_string())));
            }
        }
        rx
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Stop accepting jobs and wait for the workers to drain the queue.
    pub fn close(mut self) {
        drop(self.job_tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// Dropping without `close` detaches the workers; they exit after answering
// the jobs already queued.
impl Drop for SnapshotQueue {
    fn drop(&mut self) {
        drop(self.job_tx.take());
    }
}

fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<Job>>>, snapshotter: Arc<dyn Snapshotter>, cancel: CancelHandle) {
    loop {
        let job = match rx.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        let Ok(job) = job else { break };

        if cancel.is_cancelled() {
            let _ = job.resp.send(Err(Error::Cancelled));
            continue;
        }
        // The receiver may have gone away if the run was abandoned.
        if job.resp.is_closed() {
            continue;
        }

        // A panicking backend fails its own job; the worker keeps serving.
        let res = panic::catch_unwind(AssertUnwindSafe(|| snapshotter.snapshot(&job.options)))
            .unwrap_or_else(|payload| {
                Err(Error::Snapshot(format!("snapshotter panicked: {}", panic_message(&*payload))))
            });
        match &res {
            Ok(image) => log::debug!("{} rendered {:?}", job.id, image.dimensions()),
            Err(e) => log::debug!("{} failed: {}", job.id, e),
        }
        let _ = job.resp.send(res);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
