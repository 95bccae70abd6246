//! rdev-based input capture backend
//! Works on Windows and macOS

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info};

use crate::data::MouseButton;
use crate::error::Result;

use super::keys::KeyInput;
use super::{InputHandler, InputSource, RawInput};

type SharedHandler = Arc<Mutex<Option<Arc<InputHandler>>>>;

/// rdev-based input source.
///
/// `rdev::listen` never returns, so the listener thread is started once and
/// stays alive; stopping only detaches the handler.
pub struct RdevSource {
    handler: SharedHandler,
    listening: bool,
}

impl RdevSource {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(Mutex::new(None)),
            listening: false,
        }
    }
}

impl Default for RdevSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for RdevSource {
    fn start(&mut self, handler: Arc<InputHandler>) -> Result<()> {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }

        if self.listening {
            return Ok(());
        }
        self.listening = true;

        let shared = self.handler.clone();
        thread::Builder::new()
            .name("rdev-listener".to_string())
            .spawn(move || {
                info!("rdev input capture started");

                let mut position = (0.0_f64, 0.0_f64);
                let callback = move |event: rdev::Event| {
                    let Some(raw) = translate(&event, &mut position) else {
                        return;
                    };
                    let handler = shared.lock().ok().and_then(|slot| slot.clone());
                    if let Some(handler) = handler {
                        handler.handle(raw);
                    }
                };

                if let Err(e) = rdev::listen(callback) {
                    error!("rdev listen error: {:?}", e);
                }

                info!("rdev input capture stopped");
            })?;

        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = None;
        }
    }
}

/// Convert an rdev event, tracking the last pointer position since rdev
/// reports it only on movement
fn translate(event: &rdev::Event, position: &mut (f64, f64)) -> Option<RawInput> {
    let (x, y) = *position;
    let raw = match event.event_type {
        rdev::EventType::KeyPress(key) => RawInput::KeyPress(key_input(key, event.name.clone())),
        rdev::EventType::KeyRelease(key) => RawInput::KeyRelease(key_input(key, None)),
        rdev::EventType::ButtonPress(button) => RawInput::ButtonPress {
            button: MouseButton::from(button),
            x,
            y,
        },
        rdev::EventType::ButtonRelease(button) => RawInput::ButtonRelease {
            button: MouseButton::from(button),
            x,
            y,
        },
        rdev::EventType::MouseMove { x, y } => {
            *position = (x, y);
            RawInput::Move { x, y }
        }
        rdev::EventType::Wheel { delta_x, delta_y } => RawInput::Scroll {
            x,
            y,
            dx: delta_x,
            dy: delta_y,
        },
    };
    Some(raw)
}

fn key_input(key: rdev::Key, text: Option<String>) -> KeyInput {
    let text = text.or_else(|| key_char(key).map(|c| c.to_string()));
    KeyInput::new(text, key_symbol(key), format!("{:?}", key))
}

/// Character for letter and digit keys, used when the OS reports no text
/// (key releases)
fn key_char(key: rdev::Key) -> Option<char> {
    use rdev::Key::*;
    let c = match key {
        KeyA => 'a',
        KeyB => 'b',
        KeyC => 'c',
        KeyD => 'd',
        KeyE => 'e',
        KeyF => 'f',
        KeyG => 'g',
        KeyH => 'h',
        KeyI => 'i',
        KeyJ => 'j',
        KeyK => 'k',
        KeyL => 'l',
        KeyM => 'm',
        KeyN => 'n',
        KeyO => 'o',
        KeyP => 'p',
        KeyQ => 'q',
        KeyR => 'r',
        KeyS => 's',
        KeyT => 't',
        KeyU => 'u',
        KeyV => 'v',
        KeyW => 'w',
        KeyX => 'x',
        KeyY => 'y',
        KeyZ => 'z',
        Num0 | Kp0 => '0',
        Num1 | Kp1 => '1',
        Num2 | Kp2 => '2',
        Num3 | Kp3 => '3',
        Num4 | Kp4 => '4',
        Num5 | Kp5 => '5',
        Num6 | Kp6 => '6',
        Num7 | Kp7 => '7',
        Num8 | Kp8 => '8',
        Num9 | Kp9 => '9',
        Minus | KpMinus => '-',
        Equal => '=',
        KpPlus => '+',
        KpMultiply => '*',
        Slash | KpDivide => '/',
        Comma => ',',
        Dot => '.',
        SemiColon => ';',
        Quote => '\'',
        BackQuote => '`',
        BackSlash | IntlBackslash => '\\',
        LeftBracket => '[',
        RightBracket => ']',
        _ => return None,
    };
    Some(c)
}

/// Symbolic names for non-printing keys
fn key_symbol(key: rdev::Key) -> Option<&'static str> {
    use rdev::Key::*;
    let name = match key {
        Alt => "alt",
        AltGr => "alt_gr",
        Backspace => "backspace",
        CapsLock => "caps_lock",
        ControlLeft => "ctrl_l",
        ControlRight => "ctrl_r",
        Delete | KpDelete => "delete",
        DownArrow => "down",
        End => "end",
        Escape => "esc",
        F1 => "f1",
        F2 => "f2",
        F3 => "f3",
        F4 => "f4",
        F5 => "f5",
        F6 => "f6",
        F7 => "f7",
        F8 => "f8",
        F9 => "f9",
        F10 => "f10",
        F11 => "f11",
        F12 => "f12",
        Home => "home",
        LeftArrow => "left",
        MetaLeft => "cmd",
        MetaRight => "cmd_r",
        PageDown => "page_down",
        PageUp => "page_up",
        Return | KpReturn => "enter",
        RightArrow => "right",
        ShiftLeft => "shift",
        ShiftRight => "shift_r",
        Space => "space",
        Tab => "tab",
        UpArrow => "up",
        PrintScreen => "print_screen",
        ScrollLock => "scroll_lock",
        Pause => "pause",
        NumLock => "num_lock",
        Insert => "insert",
        Function => "fn",
        _ => return None,
    };
    Some(name)
}

impl From<rdev::Button> for MouseButton {
    fn from(button: rdev::Button) -> Self {
        match button {
            rdev::Button::Left => MouseButton::Left,
            rdev::Button::Right => MouseButton::Right,
            rdev::Button::Middle => MouseButton::Middle,
            rdev::Button::Unknown(n) => MouseButton::Other(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn event(event_type: rdev::EventType, name: Option<&str>) -> rdev::Event {
        rdev::Event {
            time: SystemTime::now(),
            name: name.map(str::to_string),
            event_type,
        }
    }

    #[test]
    fn test_button_events_use_last_pointer_position() {
        let mut position = (0.0, 0.0);
        translate(&event(rdev::EventType::MouseMove { x: 40.0, y: 60.0 }, None), &mut position);

        let press = translate(
            &event(rdev::EventType::ButtonPress(rdev::Button::Left), None),
            &mut position,
        );
        assert_eq!(
            press,
            Some(RawInput::ButtonPress {
                button: MouseButton::Left,
                x: 40.0,
                y: 60.0
            })
        );
    }

    #[test]
    fn test_key_release_recovers_letter() {
        let mut position = (0.0, 0.0);
        let release = translate(
            &event(rdev::EventType::KeyRelease(rdev::Key::KeyQ), None),
            &mut position,
        );
        match release {
            Some(RawInput::KeyRelease(key)) => assert_eq!(key.canonical_name(), "q"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_space_is_symbolic() {
        let key = key_input(rdev::Key::Space, Some(" ".to_string()));
        assert_eq!(key.canonical_name(), "space");
    }
}
