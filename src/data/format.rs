//! On-disk file formats: raw events file, normalized events, package manifest

use serde::{Deserialize, Serialize};

use super::InputEvent;

/// Type tag written into raw events files
pub const INPUT_EVENTS_TYPE: &str = "input_events";

/// Raw events file written by the event logger when it stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsFile {
    pub meta: EventsMeta,

    /// Events in insertion order, `t` in nanoseconds since the clock origin
    #[serde(default)]
    pub events: Vec<InputEvent>,
}

/// Header of a raw events file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsMeta {
    /// Wall-clock capture time (seconds since the Unix epoch)
    pub timestamp: f64,

    /// Always [`INPUT_EVENTS_TYPE`]
    #[serde(rename = "type")]
    pub kind: String,
}

impl EventsFile {
    pub fn new(timestamp: f64, events: Vec<InputEvent>) -> Self {
        Self {
            meta: EventsMeta {
                timestamp,
                kind: INPUT_EVENTS_TYPE.to_string(),
            },
            events,
        }
    }
}

/// Packaged `events.json`: the event timeline rebased to the first event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvents {
    pub meta: NormalizedMeta,

    /// Events sorted by `t`, in milliseconds relative to the first event
    pub events: Vec<InputEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMeta {
    pub fps: u32,
    pub resolution: [u32; 2],

    /// Wall-clock time the package was normalized (seconds since the Unix epoch)
    pub start_time: f64,
}

/// Packaged `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,

    /// Wall-clock time the package was produced (seconds since the Unix epoch)
    pub timestamp: f64,

    /// Session duration in seconds
    pub duration: f64,

    pub resolution: [u32; 2],
    pub fps: u32,
}

/// Wall-clock seconds since the Unix epoch, with sub-second precision
pub fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
