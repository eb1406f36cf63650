//! Chord grammar and key-name normalization.
//!
//! A chord is a set of modifiers plus one non-modifier key. The canonical
//! string form orders modifiers `ctrl, alt, shift, win`, all lowercase,
//! joined with `+`; this form is what the hotkey registry, the exclusion
//! tables and the trigger JSON all key on.

use crate::errors::{Result, RpaError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named non-modifier keys accepted by the chord grammar alongside
/// `[a-z0-9]+` and `f1..f12`.
const NAMED_KEYS: &[&str] = &[
    "space",
    "enter",
    "tab",
    "backspace",
    "delete",
    "esc",
    "insert",
    "home",
    "end",
    "page_up",
    "page_down",
    "up",
    "down",
    "left",
    "right",
];

/// A modifier set plus one non-modifier key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyChord {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub win: bool,
    pub key: String,
}

impl KeyChord {
    pub fn new(ctrl: bool, alt: bool, shift: bool, win: bool, key: &str) -> Self {
        Self {
            ctrl,
            alt,
            shift,
            win,
            key: key.to_lowercase(),
        }
    }

    /// Chord with no modifiers (bare function keys in the exclusion tables).
    pub fn bare(key: &str) -> Self {
        Self::new(false, false, false, false, key)
    }

    pub fn ctrl(key: &str) -> Self {
        Self::new(true, false, false, false, key)
    }

    pub fn alt(key: &str) -> Self {
        Self::new(false, true, false, false, key)
    }

    pub fn win(key: &str) -> Self {
        Self::new(false, false, false, true, key)
    }

    pub fn ctrl_shift(key: &str) -> Self {
        Self::new(true, false, true, false, key)
    }

    /// Parse `"ctrl+shift+r"`. Case-insensitive; `meta` is accepted as a
    /// synonym for `win`. The final segment must be a valid non-modifier key.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RpaError::Validation("empty chord".to_string()));
        }

        let mut chord = KeyChord {
            ctrl: false,
            alt: false,
            shift: false,
            win: false,
            key: String::new(),
        };

        let parts: Vec<&str> = trimmed.split('+').map(str::trim).collect();
        let (mods, key) = parts.split_at(parts.len() - 1);
        for m in mods {
            match m.to_lowercase().as_str() {
                "ctrl" => chord.ctrl = true,
                "alt" => chord.alt = true,
                "shift" => chord.shift = true,
                "win" | "meta" => chord.win = true,
                other => {
                    return Err(RpaError::Validation(format!("unknown modifier: {other}")));
                }
            }
        }

        let key = key[0].to_lowercase();
        if !is_valid_key_name(&key) {
            return Err(RpaError::Validation(format!("unknown key: {key}")));
        }
        chord.key = key;
        Ok(chord)
    }

    /// Canonical string form: `ctrl, alt, shift, win` order, lowercase.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn has_modifiers(&self) -> bool {
        self.ctrl || self.alt || self.shift || self.win
    }

    pub fn matches(&self, ctrl: bool, alt: bool, shift: bool, win: bool, key: &str) -> bool {
        self.ctrl == ctrl
            && self.alt == alt
            && self.shift == shift
            && self.win == win
            && self.key.eq_ignore_ascii_case(key)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::with_capacity(5);
        if self.ctrl {
            parts.push("ctrl");
        }
        if self.alt {
            parts.push("alt");
        }
        if self.shift {
            parts.push("shift");
        }
        if self.win {
            parts.push("win");
        }
        parts.push(&self.key);
        write!(f, "{}", parts.join("+"))
    }
}

/// True for `[a-z0-9]+`, `f1..f12` and the named keys of the grammar.
pub fn is_valid_key_name(key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    if is_function_key(key) {
        return true;
    }
    if NAMED_KEYS.contains(&key) {
        return true;
    }
    key.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// `f1` through `f12`.
pub fn is_function_key(key: &str) -> bool {
    key.strip_prefix('f')
        .and_then(|n| n.parse::<u8>().ok())
        .is_some_and(|n| (1..=12).contains(&n))
}

/// Normalize a raw key name from the OS hook to the grammar's canonical
/// lowercase form. Strips `Key`-enum decoration (`KeyA` → `a`, `Num3` → `3`),
/// maps the named keys, and passes function keys through.
pub fn normalize_key_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let stripped = lower
        .strip_prefix("key")
        .or_else(|| lower.strip_prefix("num"))
        .unwrap_or(&lower);

    match stripped {
        "return" => "enter".to_string(),
        "escape" => "esc".to_string(),
        "pageup" => "page_up".to_string(),
        "pagedown" => "page_down".to_string(),
        "uparrow" => "up".to_string(),
        "downarrow" => "down".to_string(),
        "leftarrow" => "left".to_string(),
        "rightarrow" => "right".to_string(),
        other => other.to_string(),
    }
}

/// Virtual-key code for a canonical key name, for building keyboard
/// actions out of captured chords.
pub fn vk_for_key_name(key: &str) -> Option<u32> {
    use crate::action::vk;
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_lowercase() {
            return Some(c.to_ascii_uppercase() as u32);
        }
        if c.is_ascii_digit() {
            return Some(c as u32);
        }
    }
    if let Some(n) = key.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=12).contains(&n) {
            return Some(vk::F1 + n - 1);
        }
    }
    match key {
        "space" => Some(vk::SPACE),
        "enter" => Some(vk::RETURN),
        "tab" => Some(vk::TAB),
        "backspace" => Some(vk::BACK),
        "delete" => Some(vk::DELETE),
        "esc" => Some(vk::ESCAPE),
        "insert" => Some(vk::INSERT),
        "home" => Some(vk::HOME),
        "end" => Some(vk::END),
        "page_up" => Some(vk::PRIOR),
        "page_down" => Some(vk::NEXT),
        "up" => Some(vk::UP),
        "down" => Some(vk::DOWN),
        "left" => Some(vk::LEFT),
        "right" => Some(vk::RIGHT),
        _ => None,
    }
}

/// True if the raw key name denotes a modifier key (either side).
pub fn is_modifier_key_name(raw: &str) -> bool {
    matches!(
        raw.to_lowercase().as_str(),
        "ctrlleft"
            | "ctrlright"
            | "controlleft"
            | "controlright"
            | "alt"
            | "altleft"
            | "altright"
            | "altgr"
            | "shiftleft"
            | "shiftright"
            | "metaleft"
            | "metaright"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_canonicalizes() {
        let chord = KeyChord::parse("Shift+CTRL+R").unwrap();
        assert!(chord.ctrl && chord.shift && !chord.alt && !chord.win);
        assert_eq!(chord.key, "r");
        assert_eq!(chord.canonical(), "ctrl+shift+r");
    }

    #[test]
    fn meta_is_win() {
        let chord = KeyChord::parse("meta+e").unwrap();
        assert!(chord.win);
        assert_eq!(chord.canonical(), "win+e");
    }

    #[test]
    fn named_and_function_keys() {
        assert!(KeyChord::parse("ctrl+shift+esc").is_ok());
        assert!(KeyChord::parse("alt+f4").is_ok());
        assert!(KeyChord::parse("f12").is_ok());
        assert!(KeyChord::parse("ctrl+page_up").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(KeyChord::parse("").is_err());
        assert!(KeyChord::parse("hyper+x").is_err());
        assert!(KeyChord::parse("ctrl+").is_err());
        assert!(KeyChord::parse("ctrl+page-up").is_err());
    }

    #[test]
    fn bare_key_round_trips() {
        let chord = KeyChord::parse("a").unwrap();
        assert!(!chord.has_modifiers());
        assert_eq!(KeyChord::parse(&chord.canonical()).unwrap(), chord);
    }

    #[test]
    fn normalizes_hook_names() {
        assert_eq!(normalize_key_name("KeyA"), "a");
        assert_eq!(normalize_key_name("Num3"), "3");
        assert_eq!(normalize_key_name("Return"), "enter");
        assert_eq!(normalize_key_name("Escape"), "esc");
        assert_eq!(normalize_key_name("F5"), "f5");
        assert_eq!(normalize_key_name("UpArrow"), "up");
    }

    #[test]
    fn recognizes_modifier_names() {
        assert!(is_modifier_key_name("ShiftLeft"));
        assert!(is_modifier_key_name("MetaRight"));
        assert!(!is_modifier_key_name("KeyA"));
    }
}
