//! Platform-independent input event handling
//!
//! Backends translate OS callbacks into [`RawInput`] and hand them to an
//! [`InputHandler`], which timestamps them against the shared clock,
//! synthesizes drag gestures and appends to the session's ordered log.

use std::sync::Mutex;

use crate::clock::Clock;
use crate::config::InputConfig;
use crate::data::{EventKind, InputEvent, MouseButton};

use super::keys::KeyInput;

/// An input transition as delivered by a backend
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    ButtonPress { button: MouseButton, x: f64, y: f64 },
    ButtonRelease { button: MouseButton, x: f64, y: f64 },
    Move { x: f64, y: f64 },
    Scroll { x: f64, y: f64, dx: i64, dy: i64 },
    KeyPress(KeyInput),
    KeyRelease(KeyInput),
}

/// Per-button press-move-release tracking
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DragState {
    pub active: bool,
    pub start_x: f64,
    pub start_y: f64,
    pub start_time_ns: u64,
}

/// A completed drag gesture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragEnd {
    pub start_x: f64,
    pub start_y: f64,
    pub duration_ns: u64,
}

/// Drag detection for the left, right and middle buttons
#[derive(Debug, Clone)]
pub struct DragTracker {
    states: [DragState; 3],
    threshold: f64,
}

impl DragTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            states: [DragState::default(); 3],
            threshold,
        }
    }

    /// Whether any tracked button is currently held
    pub fn any_active(&self) -> bool {
        self.states.iter().any(|s| s.active)
    }

    pub fn state(&self, button: MouseButton) -> Option<&DragState> {
        button.drag_slot().map(|slot| &self.states[slot])
    }

    pub fn press(&mut self, button: MouseButton, x: f64, y: f64, now_ns: u64) {
        if let Some(slot) = button.drag_slot() {
            self.states[slot] = DragState {
                active: true,
                start_x: x,
                start_y: y,
                start_time_ns: now_ns,
            };
        }
    }

    /// Clear the button's state. Returns the drag if the release point is
    /// further than the threshold from the press point on either axis.
    pub fn release(&mut self, button: MouseButton, x: f64, y: f64, now_ns: u64) -> Option<DragEnd> {
        let slot = button.drag_slot()?;
        let state = std::mem::take(&mut self.states[slot]);
        if !state.active {
            return None;
        }

        let dx = (x - state.start_x).abs();
        let dy = (y - state.start_y).abs();
        if dx > self.threshold || dy > self.threshold {
            Some(DragEnd {
                start_x: state.start_x,
                start_y: state.start_y,
                duration_ns: now_ns.saturating_sub(state.start_time_ns),
            })
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.states = [DragState::default(); 3];
    }
}

struct HandlerState {
    recording: bool,
    events: Vec<InputEvent>,
    drag: DragTracker,
}

/// Shared sink for backend callbacks.
///
/// One mutex serializes every append, so the log order is the order in
/// which callbacks fired.
pub struct InputHandler {
    clock: Clock,
    filter: InputConfig,
    state: Mutex<HandlerState>,
}

impl InputHandler {
    pub fn new(clock: Clock, filter: InputConfig) -> Self {
        let drag = DragTracker::new(filter.drag_threshold_px);
        Self {
            clock,
            filter,
            state: Mutex::new(HandlerState {
                recording: false,
                events: Vec::new(),
                drag,
            }),
        }
    }

    /// Start accepting events into a fresh log
    pub fn begin(&self) {
        let mut state = self.lock();
        state.events.clear();
        state.drag.reset();
        state.recording = true;
    }

    /// Stop accepting events and take the log
    pub fn finish(&self) -> Vec<InputEvent> {
        let mut state = self.lock();
        state.recording = false;
        state.drag.reset();
        std::mem::take(&mut state.events)
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Entry point for backend callbacks
    pub fn handle(&self, input: RawInput) {
        let mut state = self.lock();
        if !state.recording {
            return;
        }

        let now = self.clock.now_ns();
        let HandlerState { events, drag, .. } = &mut *state;
        let mut push = |kind: EventKind| events.push(InputEvent { t: now, kind });

        match input {
            RawInput::Move { x, y } => {
                // Hover movement is not logged, only movement while a button is held
                if self.filter.capture_mouse_drag && drag.any_active() {
                    push(EventKind::MouseDrag { x, y });
                }
            }
            RawInput::ButtonPress { button, x, y } => {
                if self.filter.capture_mouse_click {
                    push(EventKind::MouseDown { button, x, y });
                }
                drag.press(button, x, y, now);
            }
            RawInput::ButtonRelease { button, x, y } => {
                if self.filter.capture_mouse_click {
                    push(EventKind::MouseUp { button, x, y });
                }
                if let Some(end) = drag.release(button, x, y, now) {
                    if self.filter.capture_mouse_drag {
                        push(EventKind::DragEnd {
                            button,
                            start_x: end.start_x,
                            start_y: end.start_y,
                            end_x: x,
                            end_y: y,
                            duration_ns: end.duration_ns,
                        });
                    }
                }
            }
            RawInput::Scroll { x, y, dx, dy } => {
                if self.filter.capture_mouse_scroll {
                    push(EventKind::Scroll { x, y, dx, dy });
                }
            }
            RawInput::KeyPress(key) => {
                if self.filter.capture_keyboard {
                    push(EventKind::KeyDown {
                        key: key.canonical_name(),
                    });
                }
            }
            RawInput::KeyRelease(key) => {
                if self.filter.capture_keyboard {
                    push(EventKind::KeyUp {
                        key: key.canonical_name(),
                    });
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandlerState> {
        // A panicking backend callback must not take the log down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
