//! Upload tasks and their durable on-disk records

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::unix_timestamp;
use crate::error::Result;

const RECORD_PREFIX: &str = "task_";
const RECORD_SUFFIX: &str = ".json";

/// One archive waiting to be delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: Uuid,
    pub recording_path: PathBuf,

    /// Wall-clock submission time (seconds since the Unix epoch)
    pub created_at: f64,

    pub machine_id: String,
    pub os_descriptor: String,

    /// Failed delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

impl UploadTask {
    pub fn new(recording_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recording_path: recording_path.into(),
            created_at: unix_timestamp(),
            machine_id: machine_id(),
            os_descriptor: os_descriptor(),
            retry_count: 0,
        }
    }

    /// File name of the archive, sent to the collector
    pub fn file_name(&self) -> String {
        self.recording_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.zip".to_string())
    }
}

/// Stable identifier for this machine, falling back to the hostname
pub fn machine_id() -> String {
    match machine_uid::get() {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string()),
    }
}

/// `<os> <arch>`, e.g. `linux x86_64`
pub fn os_descriptor() -> String {
    format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Directory of `task_<uuid>.json` records, one per pending upload.
///
/// Records are the source of truth for what is still pending; the
/// in-memory queue only caches them.
pub struct TaskStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl TaskStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task: &UploadTask) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", RECORD_PREFIX, task.id, RECORD_SUFFIX))
    }

    /// Write (or rewrite) the task's record atomically
    pub fn persist(&self, task: &UploadTask) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let path = self.record_path(task);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(task)?;

        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        debug!("Persisted upload task {} to {:?}", task.id, path);
        Ok(())
    }

    pub fn remove(&self, task: &UploadTask) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        match fs::remove_file(self.record_path(task)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Tasks to resume after a restart, oldest first.
    ///
    /// Records whose archive no longer exists are deleted. Records past the
    /// retry ceiling stay on disk but are not resumed.
    pub fn load_pending(&self, max_retries: u32) -> Result<Vec<UploadTask>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(RECORD_PREFIX) && n.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }

            let task: UploadTask = match fs::read(&path)
                .map_err(crate::error::Error::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            {
                Ok(task) => task,
                Err(e) => {
                    warn!("Skipping unreadable upload record {:?}: {}", path, e);
                    continue;
                }
            };

            if !task.recording_path.exists() {
                info!(
                    "Discarding upload record for missing archive {:?}",
                    task.recording_path
                );
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove {:?}: {}", path, e);
                }
                continue;
            }

            if task.retry_count > max_retries {
                debug!("Leaving abandoned upload record {:?}", path);
                continue;
            }

            tasks.push(task);
        }

        tasks.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        Ok(tasks)
    }
}
