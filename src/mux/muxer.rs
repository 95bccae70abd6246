//! Timeline muxer: turns one session's raw video and events into a
//! self-describing archive

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::data::{unix_timestamp, Manifest, NormalizedEvents, NormalizedMeta};
use crate::error::{Error, Result};

use super::archive::archive_directory;
use super::timeline::{
    calculate_duration, load_events, normalize_events, session_start_time, PLACEHOLDER_DURATION_SECS,
};

pub const MANIFEST_FILE: &str = "metadata.json";
pub const EVENTS_FILE: &str = "events.json";
pub const VIDEO_FILE: &str = "video.mp4";

/// One recording session's identity and registered artifacts
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: String,
    pub working_dir: PathBuf,
    pub video_file: Option<PathBuf>,
    pub events_file: Option<PathBuf>,
}

pub struct TimelineMuxer {
    output_root: PathBuf,
    resolution: (u32, u32),
    fps: u32,
    cleanup_working_dir: bool,
    session: Option<RecordingSession>,
    running: bool,
}

impl TimelineMuxer {
    pub fn new(output_root: impl Into<PathBuf>, resolution: (u32, u32), fps: u32) -> Self {
        Self {
            output_root: output_root.into(),
            resolution,
            fps,
            cleanup_working_dir: true,
            session: None,
            running: false,
        }
    }

    /// Keep or remove the working directory once the archive exists
    pub fn with_cleanup(mut self, cleanup_working_dir: bool) -> Self {
        self.cleanup_working_dir = cleanup_working_dir;
        self
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Allocate a session id and working directory.
    /// Calling start on a running muxer returns the current session.
    pub fn start(&mut self) -> Result<&RecordingSession> {
        if self.running && self.session.is_some() {
            return self.session.as_ref().ok_or(Error::NoSession);
        }

        std::fs::create_dir_all(&self.output_root)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let id = allocate_session_id(&self.output_root, &stamp);
        let working_dir = self.output_root.join(&id);
        std::fs::create_dir_all(&working_dir)?;

        info!("Started recording session {}", id);
        self.running = true;
        Ok(self.session.insert(RecordingSession {
            id,
            working_dir,
            video_file: None,
            events_file: None,
        }))
    }

    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(session) = &self.session {
            info!("Stopped recording session {}", session.id);
        }
    }

    pub fn set_video_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        match self.session.as_mut() {
            Some(session) => {
                info!("Set video file: {:?}", path);
                session.video_file = Some(path);
            }
            None => warn!("Ignoring video file {:?}: no session", path),
        }
    }

    pub fn set_events_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        match self.session.as_mut() {
            Some(session) => {
                info!("Set events file: {:?}", path);
                session.events_file = Some(path);
            }
            None => warn!("Ignoring events file {:?}: no session", path),
        }
    }

    /// Package the session and return the archive path.
    ///
    /// A missing video or events file fails without producing an archive.
    /// An unreadable or short event log only degrades the manifest duration
    /// and the normalized timeline.
    pub fn finalize(&mut self) -> Result<PathBuf> {
        self.stop();

        let Some(session) = self.session.clone() else {
            error!("Cannot finalize: no active recording");
            return Err(Error::NoSession);
        };

        info!("Finalizing recording: {}", session.id);

        let video = match &session.video_file {
            Some(path) if path.exists() => path.clone(),
            other => {
                error!("Video file not found: {:?}", other);
                return Err(Error::MissingVideo(other.clone()));
            }
        };

        let events_path = match &session.events_file {
            Some(path) if path.exists() => path.clone(),
            other => {
                error!("Events file not found: {:?}", other);
                return Err(Error::MissingEvents(other.clone()));
            }
        };

        let (events, duration, start_time) = match load_events(&events_path) {
            Some(file) => {
                let duration = calculate_duration(&file.events);
                let start_time = session_start_time(&file);
                (file.events, duration, start_time)
            }
            None => (Vec::new(), PLACEHOLDER_DURATION_SECS, unix_timestamp()),
        };

        std::fs::create_dir_all(&session.working_dir)?;
        let resolution = [self.resolution.0, self.resolution.1];

        let manifest = Manifest {
            id: session.id.clone(),
            timestamp: unix_timestamp(),
            duration,
            resolution,
            fps: self.fps,
        };
        write_json(&session.working_dir.join(MANIFEST_FILE), &manifest)?;

        let normalized = NormalizedEvents {
            meta: NormalizedMeta {
                fps: self.fps,
                resolution,
                start_time,
            },
            events: normalize_events(events),
        };
        write_json(&session.working_dir.join(EVENTS_FILE), &normalized)?;

        std::fs::copy(&video, session.working_dir.join(VIDEO_FILE))?;

        let archive_path = self.output_root.join(format!("{}.zip", session.id));
        archive_directory(&session.working_dir, &archive_path)?;
        info!(
            "Created recording package {:?} ({:.1}s, {} events)",
            archive_path,
            duration,
            normalized.events.len()
        );

        if self.cleanup_working_dir {
            if let Err(e) = std::fs::remove_dir_all(&session.working_dir) {
                warn!("Failed to remove {:?}: {}", session.working_dir, e);
            }
        }

        self.session = None;
        Ok(archive_path)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// `recording_<stamp>`, suffixed with a counter if a directory or archive
/// of that name already exists under `root`
fn allocate_session_id(root: &Path, stamp: &str) -> String {
    let base = format!("recording_{}", stamp);
    let taken = |id: &str| root.join(id).exists() || root.join(format!("{}.zip", id)).exists();

    if !taken(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{}_{}", base, n))
        .find(|id| !taken(id))
        .unwrap_or(base)
}
