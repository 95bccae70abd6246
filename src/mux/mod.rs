//! Session packaging: normalizes the event timeline, writes the manifest
//! and bundles everything with the video into one archive

mod archive;
mod muxer;
mod timeline;

pub use archive::archive_directory;
pub use muxer::{RecordingSession, TimelineMuxer, EVENTS_FILE, MANIFEST_FILE, VIDEO_FILE};
pub use timeline::{
    calculate_duration, load_events, normalize_events, session_start_time, PLACEHOLDER_DURATION_SECS,
};
