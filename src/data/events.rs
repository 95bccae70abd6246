//! Input event data structures

use serde::{Deserialize, Serialize};

/// A single recorded input event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Timestamp: nanoseconds since the clock origin in raw event files,
    /// milliseconds since the first event once normalized
    pub t: u64,

    /// The kind of event and its fields
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Kind of input event, serialized as `"kind": "<snake_case name>"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    MouseDown {
        button: MouseButton,
        x: f64,
        y: f64,
    },
    MouseUp {
        button: MouseButton,
        x: f64,
        y: f64,
    },
    /// Pointer movement while at least one tracked button is held
    MouseDrag {
        x: f64,
        y: f64,
    },
    /// Synthesized after a release that moved further than the drag threshold
    DragEnd {
        button: MouseButton,
        start_x: f64,
        start_y: f64,
        end_x: f64,
        end_y: f64,
        duration_ns: u64,
    },
    Scroll {
        x: f64,
        y: f64,
        dx: i64,
        dy: i64,
    },
    KeyDown {
        key: String,
    },
    KeyUp {
        key: String,
    },
}

impl EventKind {
    /// The serialized kind tag
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MouseDown { .. } => "mouse_down",
            EventKind::MouseUp { .. } => "mouse_up",
            EventKind::MouseDrag { .. } => "mouse_drag",
            EventKind::DragEnd { .. } => "drag_end",
            EventKind::Scroll { .. } => "scroll",
            EventKind::KeyDown { .. } => "key_down",
            EventKind::KeyUp { .. } => "key_up",
        }
    }
}

/// Mouse button identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other(u8),
}

impl MouseButton {
    /// Slot in the per-button drag table, for buttons that are tracked
    pub fn drag_slot(self) -> Option<usize> {
        match self {
            MouseButton::Left => Some(0),
            MouseButton::Right => Some(1),
            MouseButton::Middle => Some(2),
            MouseButton::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = InputEvent {
            t: 1_500,
            kind: EventKind::MouseDown {
                button: MouseButton::Left,
                x: 100.0,
                y: 200.0,
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["t"], 1_500);
        assert_eq!(value["kind"], "mouse_down");
        assert_eq!(value["button"], "left");
        assert_eq!(value["x"], 100.0);
    }

    #[test]
    fn test_event_parses_from_flat_json() {
        let event: InputEvent =
            serde_json::from_str(r#"{"t": 42, "kind": "key_up", "key": "space"}"#).unwrap();
        assert_eq!(event.t, 42);
        assert_eq!(
            event.kind,
            EventKind::KeyUp {
                key: "space".to_string()
            }
        );
        assert_eq!(event.kind.name(), "key_up");
    }

    #[test]
    fn test_only_three_buttons_are_tracked() {
        assert_eq!(MouseButton::Left.drag_slot(), Some(0));
        assert_eq!(MouseButton::Middle.drag_slot(), Some(2));
        assert_eq!(MouseButton::Other(4).drag_slot(), None);
    }
}
