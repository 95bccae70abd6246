//! Canonical key naming
//!
//! A recorded key name is, in priority order: the printable character the
//! key produced, a symbolic name for non-printing keys (`space`, `enter`,
//! `shift`, ...), or a sanitized form of the platform's raw key identifier.

/// Key identity as reported by an input backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInput {
    /// Text produced by the key, if any
    pub text: Option<String>,

    /// Symbolic name for non-printing keys
    pub symbol: Option<&'static str>,

    /// Raw platform identifier (e.g. `KeyA`, `KEY_F13`, `Unknown(191)`)
    pub raw: String,
}

impl KeyInput {
    pub fn new(text: Option<String>, symbol: Option<&'static str>, raw: impl Into<String>) -> Self {
        Self {
            text,
            symbol,
            raw: raw.into(),
        }
    }

    /// Resolve the name recorded in `key_down` / `key_up` events
    pub fn canonical_name(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|t| is_printable(t)) {
            return text.to_string();
        }

        if let Some(symbol) = self.symbol {
            return symbol.to_string();
        }

        sanitize_key_name(&self.raw)
    }
}

/// Printable: non-empty, no control characters, not only whitespace
fn is_printable(text: &str) -> bool {
    !text.is_empty()
        && !text.chars().any(char::is_control)
        && !text.chars().all(char::is_whitespace)
}

/// Turn a raw platform identifier into a stable lowercase token
pub fn sanitize_key_name(raw: &str) -> String {
    let trimmed = raw.trim().replace(['\'', '"'], "");
    let stripped = ["Key.", "KEY_", "BTN_"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(&trimmed);

    let mut name = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }

    let name = name.trim_matches('_');
    if name.is_empty() {
        "unknown_key".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_text_wins() {
        let key = KeyInput::new(Some("a".to_string()), Some("shift"), "KeyA");
        assert_eq!(key.canonical_name(), "a");
    }

    #[test]
    fn test_space_uses_symbol() {
        let key = KeyInput::new(Some(" ".to_string()), Some("space"), "Space");
        assert_eq!(key.canonical_name(), "space");
    }

    #[test]
    fn test_control_text_falls_back_to_symbol() {
        let key = KeyInput::new(Some("\r".to_string()), Some("enter"), "Return");
        assert_eq!(key.canonical_name(), "enter");
    }

    #[test]
    fn test_raw_fallback_is_sanitized() {
        assert_eq!(KeyInput::new(None, None, "Unknown(191)").canonical_name(), "unknown_191");
        assert_eq!(KeyInput::new(None, None, "KEY_F13").canonical_name(), "f13");
        assert_eq!(KeyInput::new(None, None, "Key.media_play").canonical_name(), "media_play");
        assert_eq!(KeyInput::new(None, None, "''").canonical_name(), "unknown_key");
    }
}
