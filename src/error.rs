//! Error types for the capture, packaging and upload core

use std::path::PathBuf;

/// Failures surfaced by the recorder core.
///
/// None of these are fatal to the process: callers log them and carry on
/// with a well-defined fallback (no video, no package, no upload).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable video encoder was found on this machine
    #[error("no usable video encoder backend: {0}")]
    EncoderUnavailable(String),

    /// The encoder subprocess failed while running
    #[error("encoder process error: {0}")]
    Encoder(String),

    /// Screen grabbing failed
    #[error("screen grab failed: {0}")]
    Grab(String),

    /// Input listener could not be started
    #[error("input capture failed: {0}")]
    Input(String),

    /// The video artifact required for packaging is missing
    #[error("video file not found: {0:?}")]
    MissingVideo(Option<PathBuf>),

    /// The events artifact required for packaging is missing
    #[error("events file not found: {0:?}")]
    MissingEvents(Option<PathBuf>),

    /// finalize() was called without a session
    #[error("no active recording session")]
    NoSession,

    /// An archive path handed to the upload queue does not exist
    #[error("invalid recording path: {0:?}")]
    InvalidRecording(PathBuf),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
