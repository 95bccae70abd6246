//! Event timeline arithmetic used when packaging a session

use std::path::Path;

use tracing::{error, warn};

use crate::data::{EventsFile, InputEvent};

/// Duration reported when the events cannot tell us one
pub const PLACEHOLDER_DURATION_SECS: f64 = 30.0;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Read a raw events file.
/// Returns `None` if the file is missing or malformed.
pub fn load_events(path: &Path) -> Option<EventsFile> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not read events file {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_slice::<EventsFile>(&bytes) {
        Ok(file) => Some(file),
        Err(e) => {
            error!("Malformed events file {:?}: {}", path, e);
            None
        }
    }
}

/// Seconds between the earliest and latest event.
///
/// Fewer than two events carry no duration; the placeholder is returned.
pub fn calculate_duration(events: &[InputEvent]) -> f64 {
    if events.len() < 2 {
        return PLACEHOLDER_DURATION_SECS;
    }

    let first = events.iter().map(|e| e.t).min().unwrap_or(0);
    let last = events.iter().map(|e| e.t).max().unwrap_or(0);
    (last - first) as f64 / NANOS_PER_SEC
}

/// Wall-clock time of the earliest event: the file's capture timestamp
/// minus the span of the recorded events
pub fn session_start_time(file: &EventsFile) -> f64 {
    let first = file.events.iter().map(|e| e.t).min();
    let last = file.events.iter().map(|e| e.t).max();
    match (first, last) {
        (Some(first), Some(last)) => file.meta.timestamp - (last - first) as f64 / NANOS_PER_SEC,
        _ => file.meta.timestamp,
    }
}

/// Sort by timestamp and rebase to whole milliseconds since the first event.
///
/// The sort is stable, so events sharing a timestamp keep their recorded
/// order.
pub fn normalize_events(mut events: Vec<InputEvent>) -> Vec<InputEvent> {
    events.sort_by_key(|e| e.t);

    let Some(first) = events.first().map(|e| e.t) else {
        return events;
    };

    for event in &mut events {
        event.t = (event.t - first) / NANOS_PER_MILLI;
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EventKind;

    fn key(t: u64, key: &str) -> InputEvent {
        InputEvent {
            t,
            kind: EventKind::KeyDown {
                key: key.to_string(),
            },
        }
    }

    #[test]
    fn test_duration_from_first_and_last_event() {
        let events = vec![key(1_000_000_000, "a"), key(3_000_000_000, "b")];
        assert_eq!(calculate_duration(&events), 2.0);
    }

    #[test]
    fn test_duration_placeholder_for_short_sessions() {
        assert_eq!(calculate_duration(&[]), PLACEHOLDER_DURATION_SECS);
        assert_eq!(calculate_duration(&[key(5, "a")]), PLACEHOLDER_DURATION_SECS);
    }

    #[test]
    fn test_normalize_rebases_to_milliseconds() {
        let events = vec![key(1_000_000_000, "a"), key(3_000_000_000, "b")];
        let times: Vec<u64> = normalize_events(events).iter().map(|e| e.t).collect();
        assert_eq!(times, vec![0, 2000]);
    }

    #[test]
    fn test_normalize_truncates_sub_millisecond() {
        let events = vec![key(10, "a"), key(1_999_999 + 10, "b")];
        let times: Vec<u64> = normalize_events(events).iter().map(|e| e.t).collect();
        assert_eq!(times, vec![0, 1]);
    }

    #[test]
    fn test_normalize_sorts_and_preserves_count() {
        let events = vec![
            key(9_000_000, "c"),
            key(4_000_000, "a"),
            key(7_000_000, "b1"),
            key(7_000_000, "b2"),
            key(12_000_000, "d"),
        ];
        let normalized = normalize_events(events);

        assert_eq!(normalized.len(), 5);
        assert_eq!(normalized[0].t, 0);
        assert!(normalized.windows(2).all(|w| w[0].t <= w[1].t));

        let keys: Vec<&str> = normalized
            .iter()
            .map(|e| match &e.kind {
                EventKind::KeyDown { key } => key.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(keys, vec!["a", "b1", "b2", "c", "d"]);
    }

    #[test]
    fn test_start_time_backs_off_event_span() {
        let file = EventsFile::new(
            1_700_000_010.0,
            vec![key(3_000_000_000, "b"), key(1_000_000_000, "a")],
        );
        assert_eq!(session_start_time(&file), 1_700_000_008.0);

        let empty = EventsFile::new(1_700_000_010.0, Vec::new());
        assert_eq!(session_start_time(&empty), 1_700_000_010.0);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_events(Vec::new()).is_empty());
    }

    #[test]
    fn test_load_events_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(load_events(&path).is_none());
        assert!(load_events(&dir.path().join("missing.json")).is_none());
    }
}
