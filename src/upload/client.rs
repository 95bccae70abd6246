//! Archive delivery to the collector
//!
//! The archive is streamed from disk so large recordings never have to fit
//! in RAM.

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::UploadConfig;

use super::task::UploadTask;

pub const ORIGINAL_FILENAME_HEADER: &str = "x-original-filename";
pub const RECORDING_META_HEADER: &str = "x-recording-meta";
pub const CONTENT_SHA256_HEADER: &str = "x-content-sha256";

/// Transport for one upload attempt. Any error counts as a failed attempt.
pub trait Delivery: Send + Sync + 'static {
    fn deliver(&self, task: &UploadTask) -> impl Future<Output = Result<()>> + Send;
}

/// Metadata blob carried in the `x-recording-meta` header
#[derive(Debug, Serialize)]
struct RecordingMeta<'a> {
    machine: &'a str,
    os: &'a str,
    timestamp: f64,
}

/// POSTs the raw archive bytes to the configured endpoint
#[derive(Clone)]
pub struct HttpDelivery {
    client: Client,
    endpoint: String,
}

impl HttpDelivery {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Delivery for HttpDelivery {
    async fn deliver(&self, task: &UploadTask) -> Result<()> {
        let path = &task.recording_path;
        info!("Uploading recording {:?} to {}", path, self.endpoint);

        let file_size = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to get archive metadata: {:?}", path))?
            .len();

        let digest = sha256_file(path.clone()).await?;
        debug!("Archive sha256 {}", digest);

        let meta = serde_json::to_string(&RecordingMeta {
            machine: &task.machine_id,
            os: &task.os_descriptor,
            timestamp: task.created_at,
        })?;

        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open archive: {:?}", path))?;
        let body = Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/zip")
            .header(CONTENT_LENGTH, file_size)
            .header(ORIGINAL_FILENAME_HEADER, task.file_name())
            .header(RECORDING_META_HEADER, meta)
            .header(CONTENT_SHA256_HEADER, digest)
            .body(body)
            .send()
            .await
            .context("Failed to upload archive")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!(
                "Upload failed with status {}: {}",
                status,
                text.chars().take(500).collect::<String>()
            );
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Collector reply was not JSON")?;

        info!(
            "Uploaded {:?} ({:.2} MB): {}",
            path,
            file_size as f64 / (1024.0 * 1024.0),
            reply
        );
        Ok(())
    }
}

/// Hex SHA-256 of a file, hashed off the async runtime
pub async fn sha256_file(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .context("Hashing task failed")?
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open archive for hashing: {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
