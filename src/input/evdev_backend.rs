//! evdev-based input capture backend for Linux (X11 and Wayland)
//! Requires the user to be in the 'input' group

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use evdev::{Device, InputEventKind, Key, RelativeAxisType};
use tracing::{debug, info, warn};

use crate::data::MouseButton;
use crate::error::{Error, Result};

use super::keys::KeyInput;
use super::{InputHandler, InputSource, RawInput};

type SharedHandler = Arc<Mutex<Option<Arc<InputHandler>>>>;

/// Pointer position integrated from relative motion, clamped to the display
#[derive(Debug, Clone, Copy)]
struct Pointer {
    x: f64,
    y: f64,
    max_x: f64,
    max_y: f64,
}

impl Pointer {
    fn centered(bounds: (u32, u32)) -> Self {
        let max_x = f64::from(bounds.0.saturating_sub(1));
        let max_y = f64::from(bounds.1.saturating_sub(1));
        Self {
            x: (max_x / 2.0).floor(),
            y: (max_y / 2.0).floor(),
            max_x,
            max_y,
        }
    }

    fn shift(&mut self, dx: f64, dy: f64) {
        self.x = (self.x + dx).clamp(0.0, self.max_x);
        self.y = (self.y + dy).clamp(0.0, self.max_y);
    }
}

pub struct EvdevSource {
    devices: Vec<Device>,
    handler: SharedHandler,
    pointer: Arc<Mutex<Pointer>>,
    stopped: Arc<AtomicBool>,
}

impl EvdevSource {
    /// Enumerate keyboards and pointing devices under /dev/input
    pub fn new(bounds: (u32, u32)) -> Result<Self> {
        let mut devices = Vec::new();

        for (path, device) in evdev::enumerate() {
            let name = device.name().unwrap_or("Unknown").to_string();
            let is_keyboard = device
                .supported_keys()
                .map(|keys| keys.contains(Key::KEY_A) || keys.contains(Key::BTN_LEFT))
                .unwrap_or(false);
            let is_pointer = device
                .supported_relative_axes()
                .map(|axes| axes.contains(RelativeAxisType::REL_X))
                .unwrap_or(false);

            if is_keyboard || is_pointer {
                info!("Found input device: {} ({:?})", name, path);
                devices.push(device);
            } else {
                debug!("Skipping input device: {} ({:?})", name, path);
            }
        }

        if devices.is_empty() {
            return Err(Error::Input(
                "No input devices found. Make sure you are in the 'input' group.".to_string(),
            ));
        }

        Ok(Self {
            devices,
            handler: Arc::new(Mutex::new(None)),
            pointer: Arc::new(Mutex::new(Pointer::centered(bounds))),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl InputSource for EvdevSource {
    fn start(&mut self, handler: Arc<InputHandler>) -> Result<()> {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }

        // Device threads are spawned once and outlive stop/start cycles
        for mut device in std::mem::take(&mut self.devices) {
            let shared = self.handler.clone();
            let pointer = self.pointer.clone();
            let stopped = self.stopped.clone();

            thread::Builder::new()
                .name("evdev-listener".to_string())
                .spawn(move || {
                    let device_name = device.name().unwrap_or("Unknown").to_string();
                    info!("Started evdev capture for: {}", device_name);

                    while !stopped.load(Ordering::SeqCst) {
                        let events: Vec<evdev::InputEvent> = match device.fetch_events() {
                            Ok(events) => events.collect(),
                            Err(e) => {
                                warn!("evdev fetch error for {}: {}", device_name, e);
                                thread::sleep(Duration::from_millis(100));
                                continue;
                            }
                        };

                        let handler = shared.lock().ok().and_then(|slot| slot.clone());
                        let Some(handler) = handler else {
                            continue;
                        };

                        for ev in events {
                            let raw = match pointer.lock() {
                                Ok(mut pointer) => translate(&ev, &mut pointer),
                                Err(_) => None,
                            };
                            if let Some(raw) = raw {
                                handler.handle(raw);
                            }
                        }
                    }

                    info!("Stopped evdev capture for: {}", device_name);
                })?;
        }

        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = None;
        }
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn translate(ev: &evdev::InputEvent, pointer: &mut Pointer) -> Option<RawInput> {
    match ev.kind() {
        InputEventKind::Key(key) => {
            if let Some(button) = mouse_button(key) {
                let (x, y) = (pointer.x, pointer.y);
                return match ev.value() {
                    1 => Some(RawInput::ButtonPress { button, x, y }),
                    0 => Some(RawInput::ButtonRelease { button, x, y }),
                    _ => None,
                };
            }

            let input = KeyInput::new(
                key_char(key).map(|c| c.to_string()),
                key_symbol(key),
                format!("{:?}", key),
            );
            match ev.value() {
                1 => Some(RawInput::KeyPress(input)),
                0 => Some(RawInput::KeyRelease(input)),
                _ => None, // Key repeat, ignore
            }
        }
        InputEventKind::RelAxis(axis) => {
            let value = ev.value();
            match axis {
                RelativeAxisType::REL_X => {
                    pointer.shift(f64::from(value), 0.0);
                    Some(RawInput::Move {
                        x: pointer.x,
                        y: pointer.y,
                    })
                }
                RelativeAxisType::REL_Y => {
                    pointer.shift(0.0, f64::from(value));
                    Some(RawInput::Move {
                        x: pointer.x,
                        y: pointer.y,
                    })
                }
                RelativeAxisType::REL_WHEEL => Some(RawInput::Scroll {
                    x: pointer.x,
                    y: pointer.y,
                    dx: 0,
                    dy: i64::from(value),
                }),
                RelativeAxisType::REL_HWHEEL => Some(RawInput::Scroll {
                    x: pointer.x,
                    y: pointer.y,
                    dx: i64::from(value),
                    dy: 0,
                }),
                _ => None,
            }
        }
        _ => None,
    }
}

fn mouse_button(key: Key) -> Option<MouseButton> {
    match key {
        Key::BTN_LEFT => Some(MouseButton::Left),
        Key::BTN_RIGHT => Some(MouseButton::Right),
        Key::BTN_MIDDLE => Some(MouseButton::Middle),
        Key::BTN_SIDE | Key::BTN_EXTRA | Key::BTN_FORWARD | Key::BTN_BACK | Key::BTN_TASK => {
            Some(MouseButton::Other((key.code() - Key::BTN_LEFT.code()) as u8))
        }
        _ => None,
    }
}

fn key_char(key: Key) -> Option<char> {
    const LETTERS: [(Key, char); 26] = [
        (Key::KEY_A, 'a'),
        (Key::KEY_B, 'b'),
        (Key::KEY_C, 'c'),
        (Key::KEY_D, 'd'),
        (Key::KEY_E, 'e'),
        (Key::KEY_F, 'f'),
        (Key::KEY_G, 'g'),
        (Key::KEY_H, 'h'),
        (Key::KEY_I, 'i'),
        (Key::KEY_J, 'j'),
        (Key::KEY_K, 'k'),
        (Key::KEY_L, 'l'),
        (Key::KEY_M, 'm'),
        (Key::KEY_N, 'n'),
        (Key::KEY_O, 'o'),
        (Key::KEY_P, 'p'),
        (Key::KEY_Q, 'q'),
        (Key::KEY_R, 'r'),
        (Key::KEY_S, 's'),
        (Key::KEY_T, 't'),
        (Key::KEY_U, 'u'),
        (Key::KEY_V, 'v'),
        (Key::KEY_W, 'w'),
        (Key::KEY_X, 'x'),
        (Key::KEY_Y, 'y'),
        (Key::KEY_Z, 'z'),
    ];
    const OTHERS: [(Key, char); 21] = [
        (Key::KEY_0, '0'),
        (Key::KEY_1, '1'),
        (Key::KEY_2, '2'),
        (Key::KEY_3, '3'),
        (Key::KEY_4, '4'),
        (Key::KEY_5, '5'),
        (Key::KEY_6, '6'),
        (Key::KEY_7, '7'),
        (Key::KEY_8, '8'),
        (Key::KEY_9, '9'),
        (Key::KEY_MINUS, '-'),
        (Key::KEY_EQUAL, '='),
        (Key::KEY_LEFTBRACE, '['),
        (Key::KEY_RIGHTBRACE, ']'),
        (Key::KEY_SEMICOLON, ';'),
        (Key::KEY_APOSTROPHE, '\''),
        (Key::KEY_GRAVE, '`'),
        (Key::KEY_BACKSLASH, '\\'),
        (Key::KEY_COMMA, ','),
        (Key::KEY_DOT, '.'),
        (Key::KEY_SLASH, '/'),
    ];

    LETTERS
        .iter()
        .chain(OTHERS.iter())
        .find(|(k, _)| *k == key)
        .map(|(_, c)| *c)
}

fn key_symbol(key: Key) -> Option<&'static str> {
    let name = match key {
        Key::KEY_SPACE => "space",
        Key::KEY_ENTER | Key::KEY_KPENTER => "enter",
        Key::KEY_ESC => "esc",
        Key::KEY_TAB => "tab",
        Key::KEY_BACKSPACE => "backspace",
        Key::KEY_DELETE => "delete",
        Key::KEY_INSERT => "insert",
        Key::KEY_HOME => "home",
        Key::KEY_END => "end",
        Key::KEY_PAGEUP => "page_up",
        Key::KEY_PAGEDOWN => "page_down",
        Key::KEY_UP => "up",
        Key::KEY_DOWN => "down",
        Key::KEY_LEFT => "left",
        Key::KEY_RIGHT => "right",
        Key::KEY_LEFTSHIFT => "shift",
        Key::KEY_RIGHTSHIFT => "shift_r",
        Key::KEY_LEFTCTRL => "ctrl_l",
        Key::KEY_RIGHTCTRL => "ctrl_r",
        Key::KEY_LEFTALT => "alt",
        Key::KEY_RIGHTALT => "alt_gr",
        Key::KEY_LEFTMETA => "cmd",
        Key::KEY_RIGHTMETA => "cmd_r",
        Key::KEY_CAPSLOCK => "caps_lock",
        Key::KEY_NUMLOCK => "num_lock",
        Key::KEY_SCROLLLOCK => "scroll_lock",
        Key::KEY_SYSRQ => "print_screen",
        Key::KEY_PAUSE => "pause",
        Key::KEY_MENU => "menu",
        Key::KEY_F1 => "f1",
        Key::KEY_F2 => "f2",
        Key::KEY_F3 => "f3",
        Key::KEY_F4 => "f4",
        Key::KEY_F5 => "f5",
        Key::KEY_F6 => "f6",
        Key::KEY_F7 => "f7",
        Key::KEY_F8 => "f8",
        Key::KEY_F9 => "f9",
        Key::KEY_F10 => "f10",
        Key::KEY_F11 => "f11",
        Key::KEY_F12 => "f12",
        _ => return None,
    };
    Some(name)
}
