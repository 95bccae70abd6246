//! Durable upload queue with a background worker
//!
//! Every submitted archive is persisted to the task store before it enters
//! the in-memory queue, so a crash right after submission loses nothing.
//! The worker retries failed deliveries with capped exponential backoff.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::client::Delivery;
use super::retry::RetryPolicy;
use super::task::{TaskStore, UploadTask};

/// How often an idle worker wakes to check for shutdown
const WORKER_POLL: Duration = Duration::from_secs(5);

/// Options for the upload worker
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub policy: RetryPolicy,

    /// Delete the archive after the collector accepted it
    pub delete_after_upload: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            delete_after_upload: false,
        }
    }
}

pub struct UploadQueue {
    store: Arc<TaskStore>,
    tx: mpsc::UnboundedSender<UploadTask>,
    pending: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl UploadQueue {
    /// Reload pending tasks from `queue_dir` and start the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<D: Delivery>(
        queue_dir: impl Into<PathBuf>,
        delivery: D,
        options: QueueOptions,
    ) -> Result<Self> {
        let store = Arc::new(TaskStore::open(queue_dir)?);
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let resumed = store.load_pending(options.policy.max_retries)?;
        if !resumed.is_empty() {
            info!("Resuming {} pending upload(s)", resumed.len());
        }
        for task in resumed {
            pending.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(task);
        }

        let worker = Worker {
            store: store.clone(),
            delivery,
            options,
            requeue: tx.clone(),
            pending: pending.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        info!("Upload queue started ({:?})", store.dir());
        Ok(Self {
            store,
            tx,
            pending,
            shutdown,
            worker: Some(handle),
        })
    }

    /// Queue an archive for upload.
    ///
    /// Fails only if the archive does not exist or its record cannot be
    /// written; delivery itself happens in the background.
    pub fn submit(&self, recording_path: &Path) -> Result<()> {
        if !recording_path.is_file() {
            error!("Invalid recording path: {:?}", recording_path);
            return Err(Error::InvalidRecording(recording_path.to_path_buf()));
        }

        let task = UploadTask::new(recording_path);
        self.store.persist(&task)?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            // Worker is gone; the record stays on disk for the next start
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Upload worker not running, {:?} will be retried on restart", recording_path);
        } else {
            info!("Queued {:?} for upload", recording_path);
        }
        Ok(())
    }

    /// Tasks queued or in flight
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until nothing is pending. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.pending_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop the worker between tasks. Anything still pending stays in the
    /// task store.
    pub async fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        let grace = WORKER_POLL + Duration::from_secs(1);
        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!("Upload worker busy, abandoning in-flight attempt");
            worker.abort();
        }
        info!("Upload queue stopped with {} pending", self.pending_count());
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

struct Worker<D> {
    store: Arc<TaskStore>,
    delivery: D,
    options: QueueOptions,
    requeue: mpsc::UnboundedSender<UploadTask>,
    pending: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl<D: Delivery> Worker<D> {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<UploadTask>) {
        debug!("Upload worker started");
        while !self.shutdown.load(Ordering::SeqCst) {
            let task = match tokio::time::timeout(WORKER_POLL, rx.recv()).await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(_) => continue,
            };
            self.process(task).await;
        }
        debug!("Upload worker stopped");
    }

    async fn process(&self, mut task: UploadTask) {
        if !task.recording_path.exists() {
            error!("Recording file no longer exists: {:?}", task.recording_path);
            self.forget(&task);
            return;
        }

        match self.delivery.deliver(&task).await {
            Ok(()) => {
                info!("Successfully uploaded recording: {:?}", task.recording_path);
                self.forget(&task);
                if self.options.delete_after_upload {
                    if let Err(e) = std::fs::remove_file(&task.recording_path) {
                        warn!("Failed to delete uploaded archive: {}", e);
                    }
                }
            }
            Err(e) => {
                task.retry_count += 1;
                // Keep the attempt count across restarts
                if let Err(e) = self.store.persist(&task) {
                    warn!("Failed to update upload record: {}", e);
                }

                let policy = &self.options.policy;
                if policy.should_retry(task.retry_count) {
                    let wait = policy.backoff(task.retry_count);
                    warn!(
                        "Upload of {:?} failed (attempt {}): {:#}. Retrying in {:?}",
                        task.recording_path, task.retry_count, e, wait
                    );
                    tokio::time::sleep(wait).await;
                    if self.requeue.send(task).is_err() {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                } else {
                    error!(
                        "Upload failed after maximum retries, leaving record for {:?}: {:#}",
                        task.recording_path, e
                    );
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Drop a task for good, deleting its record
    fn forget(&self, task: &UploadTask) {
        if let Err(e) = self.store.remove(task) {
            warn!("Failed to remove upload record for {}: {}", task.id, e);
        }
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
