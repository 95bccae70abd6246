//! Configuration management for the screencast recorder

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Screen capture configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Input capture configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Recording / packaging configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Output width in pixels. Detected from the primary display when unset.
    #[serde(default)]
    pub width: Option<u32>,

    /// Output height in pixels. Detected from the primary display when unset.
    #[serde(default)]
    pub height: Option<u32>,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Encoder program (must accept ffmpeg-style arguments)
    #[serde(default = "default_encoder_program")]
    pub encoder_program: String,

    /// X11 display to grab on Linux (defaults to $DISPLAY)
    #[serde(default)]
    pub display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Whether to capture keyboard events
    #[serde(default = "default_true")]
    pub capture_keyboard: bool,

    /// Whether to capture mouse clicks
    #[serde(default = "default_true")]
    pub capture_mouse_click: bool,

    /// Whether to capture pointer movement while a button is held
    #[serde(default = "default_true")]
    pub capture_mouse_drag: bool,

    /// Whether to capture mouse scroll
    #[serde(default = "default_true")]
    pub capture_mouse_scroll: bool,

    /// Displacement (pixels, either axis) above which a press/release is a drag
    #[serde(default = "default_drag_threshold")]
    pub drag_threshold_px: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Root directory for raw artifacts, session directories and archives
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Remove the session working directory once the archive is written
    #[serde(default = "default_true")]
    pub cleanup_working_dir: bool,

    /// Stop automatically after this many seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Collector endpoint receiving archive POSTs
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry ceiling; a task failing more often than this is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on a single backoff sleep
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Whether to delete local archives after successful upload
    #[serde(default)]
    pub delete_after_upload: bool,

    /// Directory holding durable upload task records
    #[serde(default)]
    pub queue_directory: Option<PathBuf>,

    /// How long the binary waits for pending uploads before exiting
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

// Default value functions
fn default_fps() -> u32 {
    10
}

fn default_encoder_program() -> String {
    "ffmpeg".to_string()
}

fn default_true() -> bool {
    true
}

fn default_drag_threshold() -> f64 {
    5.0
}

fn default_output_directory() -> PathBuf {
    std::env::temp_dir().join("screencast-recorder")
}

fn default_endpoint() -> String {
    "http://localhost:3000/api/recordings".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

fn default_max_backoff_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fps: default_fps(),
            encoder_program: default_encoder_program(),
            display: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            capture_keyboard: true,
            capture_mouse_click: true,
            capture_mouse_drag: true,
            capture_mouse_scroll: true,
            drag_threshold_px: default_drag_threshold(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            cleanup_working_dir: true,
            max_duration_secs: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_backoff_secs: default_max_backoff_secs(),
            delete_after_upload: false,
            queue_directory: None,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from an explicit path, creating it if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "screencast", "recorder")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Directory holding durable upload records
    pub fn queue_directory(&self) -> PathBuf {
        self.upload
            .queue_directory
            .clone()
            .unwrap_or_else(|| self.recording.output_directory.join("queue"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.capture.fps, 10);
        assert_eq!(config.upload.max_retries, 5);
        assert_eq!(config.upload.max_backoff_secs, 30);
        assert_eq!(config.input.drag_threshold_px, 5.0);
        assert!(config.capture.width.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [capture]
            fps = 15
            width = 1920
            height = 1080

            [upload]
            endpoint = "https://collector.example/api/recordings"
            "#,
        )
        .unwrap();

        assert_eq!(config.capture.fps, 15);
        assert_eq!(config.capture.width, Some(1920));
        assert_eq!(config.capture.encoder_program, "ffmpeg");
        assert_eq!(config.upload.endpoint, "https://collector.example/api/recordings");
        assert_eq!(config.upload.timeout_secs, 60);
        assert!(config.input.capture_keyboard);
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.config_path().unwrap(), path);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.capture.fps, config.capture.fps);
    }

    #[test]
    fn test_queue_directory_defaults_under_output() {
        let mut config = Config::default();
        config.recording.output_directory = PathBuf::from("/data/rec");
        assert_eq!(config.queue_directory(), PathBuf::from("/data/rec/queue"));

        config.upload.queue_directory = Some(PathBuf::from("/var/queue"));
        assert_eq!(config.queue_directory(), PathBuf::from("/var/queue"));
    }
}
