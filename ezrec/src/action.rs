//! Action entities: the atomic steps of a Recording.
//!
//! An action is a shared header (identity, ordering, timing and failure
//! policy) plus a tagged payload for the keyboard/mouse/window/wait
//! variants. Validation is a match on the tag and returns a report that
//! separates hard errors from advisory warnings.

use crate::errors::{Result, RpaError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Windows virtual-key codes used by key mapping and synthesis.
pub mod vk {
    pub const BACK: u32 = 0x08;
    pub const TAB: u32 = 0x09;
    pub const RETURN: u32 = 0x0D;
    pub const SHIFT: u32 = 0x10;
    pub const CONTROL: u32 = 0x11;
    pub const MENU: u32 = 0x12; // Alt
    pub const ESCAPE: u32 = 0x1B;
    pub const SPACE: u32 = 0x20;
    pub const PRIOR: u32 = 0x21; // Page Up
    pub const NEXT: u32 = 0x22; // Page Down
    pub const END: u32 = 0x23;
    pub const HOME: u32 = 0x24;
    pub const LEFT: u32 = 0x25;
    pub const UP: u32 = 0x26;
    pub const RIGHT: u32 = 0x27;
    pub const DOWN: u32 = 0x28;
    pub const INSERT: u32 = 0x2D;
    pub const DELETE: u32 = 0x2E;
    pub const LWIN: u32 = 0x5B;
    pub const F1: u32 = 0x70;
}

/// Coordinate range accepted by the OS input layer (signed 16-bit).
pub const MIN_COORDINATE: i32 = -32768;
pub const MAX_COORDINATE: i32 = 32767;

/// Default per-action synthesis timeout, milliseconds.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5000;

/// Validation outcome: any error makes the subject invalid; warnings are
/// advisory and never block execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Collapse into a `Validation` error when any error was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(RpaError::Validation(self.errors.join("; ")))
        }
    }
}

/// A screen position with the DPI scale it was captured under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_dpi_scale")]
    pub dpi_scale: f64,
}

fn default_dpi_scale() -> f64 {
    1.0
}

impl Coordinate {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            dpi_scale: 1.0,
        }
    }

    pub fn with_dpi(x: i32, y: i32, dpi_scale: f64) -> Self {
        Self { x, y, dpi_scale }
    }

    /// Rescale for replay on a display with a different DPI ratio.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: (self.x as f64 * factor).round() as i32,
            y: (self.y as f64 * factor).round() as i32,
            dpi_scale: self.dpi_scale,
        }
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Mouse buttons, including the two extended buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

/// A virtual-key press with modifier flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInput {
    pub key_code: u32,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub win: bool,
}

impl KeyInput {
    pub fn new(key_code: u32) -> Result<Self> {
        if key_code > 255 {
            return Err(RpaError::Validation(format!(
                "virtual-key code out of range: {key_code}"
            )));
        }
        Ok(Self {
            key_code,
            shift: false,
            ctrl: false,
            alt: false,
            win: false,
        })
    }

    /// Build from a single printable character. Letters carry the shift
    /// flag for uppercase; a handful of whitespace characters map to their
    /// virtual keys.
    pub fn from_char(c: char) -> Result<Self> {
        if c.is_ascii_alphabetic() {
            let mut input = Self::new(c.to_ascii_uppercase() as u32)?;
            input.shift = c.is_ascii_uppercase();
            Ok(input)
        } else if c.is_ascii_digit() {
            Self::new(c as u32)
        } else {
            let code = match c {
                ' ' => vk::SPACE,
                '\t' => vk::TAB,
                '\n' => vk::RETURN,
                '\u{8}' => vk::BACK,
                other => {
                    return Err(RpaError::Validation(format!(
                        "unsupported character: {other:?}"
                    )))
                }
            };
            Self::new(code)
        }
    }

    pub fn ctrl_combination(key_code: u32) -> Result<Self> {
        let mut input = Self::new(key_code)?;
        input.ctrl = true;
        Ok(input)
    }

    pub fn alt_combination(key_code: u32) -> Result<Self> {
        let mut input = Self::new(key_code)?;
        input.alt = true;
        Ok(input)
    }
}

impl fmt::Display for KeyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.win {
            parts.push("Win".to_string());
        }
        if self.ctrl {
            parts.push("Ctrl".to_string());
        }
        if self.alt {
            parts.push("Alt".to_string());
        }
        if self.shift {
            parts.push("Shift".to_string());
        }
        let key_name = match self.key_code {
            0x41..=0x5A | 0x30..=0x39 => char::from_u32(self.key_code).unwrap().to_string(),
            code if (vk::F1..vk::F1 + 12).contains(&code) => format!("F{}", code - vk::F1 + 1),
            code => format!("Key({code})"),
        };
        parts.push(key_name);
        write!(f, "{}", parts.join("+"))
    }
}

/// How a text payload reaches the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMethod {
    /// Per-keystroke synthesis.
    Direct,
    /// Through the OS composition mechanism.
    Ime,
    /// Write to clipboard, paste, restore.
    Clipboard,
}

/// True when the text contains Hiragana, Katakana or CJK ideographs and
/// therefore needs the composition path.
pub fn requires_ime(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{3040}'..='\u{309F}').contains(&c)
            || ('\u{30A0}'..='\u{30FF}').contains(&c)
            || ('\u{4E00}'..='\u{9FAF}').contains(&c)
    })
}

/// Keyboard payload: exactly one of a key chord or a text run, by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyboardPayload {
    Keys(KeyInput),
    Text { text: String, method: InputMethod },
}

/// Identifies a window by any combination of title, class and process name.
/// At least one field must be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowTarget {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub process_name: String,
}

impl WindowTarget {
    pub fn by_title(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.class_name.is_empty() && self.process_name.is_empty()
    }
}

/// Mouse payload. A non-zero wheel delta is only meaningful on the middle
/// button; `MouseInput::new` enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseInput {
    pub button: MouseButton,
    pub position: Coordinate,
    #[serde(default)]
    pub double_click: bool,
    #[serde(default)]
    pub wheel_delta: i32,
}

impl MouseInput {
    pub fn new(
        button: MouseButton,
        position: Coordinate,
        double_click: bool,
        wheel_delta: i32,
    ) -> Result<Self> {
        if wheel_delta != 0 && button != MouseButton::Middle {
            return Err(RpaError::Validation(
                "wheel delta requires the middle button".to_string(),
            ));
        }
        Ok(Self {
            button,
            position,
            double_click,
            wheel_delta,
        })
    }

    pub fn click(button: MouseButton, position: Coordinate) -> Self {
        Self {
            button,
            position,
            double_click: false,
            wheel_delta: 0,
        }
    }
}

/// The variant payload of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Keyboard {
        payload: KeyboardPayload,
    },
    Mouse {
        input: MouseInput,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        target_window: Option<WindowTarget>,
        #[serde(default)]
        relative_to_window: bool,
    },
    Window {
        target: WindowTarget,
        #[serde(default)]
        activate: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        move_to: Option<(i32, i32)>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        resize: Option<(u32, u32)>,
    },
    Wait {
        duration_ms: u64,
    },
}

impl ActionKind {
    /// Short tag used by the denormalized search index.
    pub fn tag(&self) -> &'static str {
        match self {
            ActionKind::Keyboard { .. } => "keyboard",
            ActionKind::Mouse { .. } => "mouse",
            ActionKind::Window { .. } => "window",
            ActionKind::Wait { .. } => "wait",
        }
    }

    /// One-line summary for the search index and logs.
    pub fn summary(&self) -> String {
        match self {
            ActionKind::Keyboard {
                payload: KeyboardPayload::Keys(input),
            } => format!("key {input}"),
            ActionKind::Keyboard {
                payload: KeyboardPayload::Text { text, .. },
            } => {
                let preview: String = text.chars().take(20).collect();
                if text.chars().count() > 20 {
                    format!("text {preview}…")
                } else {
                    format!("text {preview}")
                }
            }
            ActionKind::Mouse { input, .. } => {
                if input.wheel_delta != 0 {
                    format!(
                        "wheel {} at ({}, {})",
                        input.wheel_delta, input.position.x, input.position.y
                    )
                } else if input.double_click {
                    format!(
                        "double-click {:?} at ({}, {})",
                        input.button, input.position.x, input.position.y
                    )
                } else {
                    format!(
                        "click {:?} at ({}, {})",
                        input.button, input.position.x, input.position.y
                    )
                }
            }
            ActionKind::Window { target, .. } => format!("window {}", target.title),
            ActionKind::Wait { duration_ms } => format!("wait {duration_ms}ms"),
        }
    }

    /// Target window, when the variant carries one.
    pub fn window_target(&self) -> Option<&WindowTarget> {
        match self {
            ActionKind::Mouse { target_window, .. } => target_window.as_ref(),
            ActionKind::Window { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// A single step of a recording: shared header plus variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: Uuid,
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    /// Delay before synthesis, milliseconds. Scaled by the playback speed.
    pub delay_before: u64,
    /// Delay after synthesis, milliseconds. Scaled by the playback speed.
    pub delay_after: u64,
    /// Per-attempt synthesis bound, milliseconds. Always positive.
    pub timeout: u64,
    /// Total attempts, at least 1.
    pub retry_count: u32,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(flatten)]
    pub kind: ActionKind,

    /// Runtime bookkeeping; not part of the canonical form.
    #[serde(skip)]
    pub execution_count: u64,
    #[serde(skip)]
    pub last_execution_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_execution_result: Option<bool>,
    #[serde(skip)]
    pub last_error_message: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            sequence_number: 0,
            timestamp: Utc::now(),
            description: String::new(),
            delay_before: 0,
            delay_after: 0,
            timeout: DEFAULT_ACTION_TIMEOUT_MS,
            retry_count: 1,
            continue_on_error: false,
            kind,
            execution_count: 0,
            last_execution_time: None,
            last_execution_result: None,
            last_error_message: None,
        }
    }

    pub fn key_press(input: KeyInput) -> Self {
        let mut action = Self::new(ActionKind::Keyboard {
            payload: KeyboardPayload::Keys(input),
        });
        action.description = format!("key press: {input}");
        action
    }

    /// Text-input action. Text containing Hiragana, Katakana or CJK
    /// ideographs auto-promotes `Direct` to `Ime`.
    pub fn text_input(text: &str, method: InputMethod) -> Self {
        let method = if method == InputMethod::Direct && requires_ime(text) {
            InputMethod::Ime
        } else {
            method
        };
        let mut action = Self::new(ActionKind::Keyboard {
            payload: KeyboardPayload::Text {
                text: text.to_string(),
                method,
            },
        });
        let preview: String = text.chars().take(20).collect();
        action.description = format!("text input: {preview}");
        action
    }

    pub fn mouse_click(button: MouseButton, position: Coordinate) -> Self {
        let mut action = Self::new(ActionKind::Mouse {
            input: MouseInput::click(button, position),
            target_window: None,
            relative_to_window: false,
        });
        action.description = format!("mouse click: ({}, {})", position.x, position.y);
        action
    }

    pub fn wait(duration_ms: u64) -> Self {
        let mut action = Self::new(ActionKind::Wait { duration_ms });
        action.description = format!("wait: {duration_ms}ms");
        action
    }

    pub fn window_activate(target: WindowTarget) -> Self {
        let mut action = Self::new(ActionKind::Window {
            activate: true,
            move_to: None,
            resize: None,
            target,
        });
        if let ActionKind::Window { target, .. } = &action.kind {
            action.description = format!("activate window: {}", target.title);
        }
        action
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.timeout == 0 {
            report.error("timeout must be positive");
        }
        if self.retry_count == 0 {
            report.error("retry count must be at least 1");
        }

        match &self.kind {
            ActionKind::Keyboard { payload } => match payload {
                KeyboardPayload::Keys(input) => {
                    if input.key_code > 255 {
                        report.error(format!("virtual-key code out of range: {}", input.key_code));
                    }
                }
                KeyboardPayload::Text { text, .. } => {
                    if text.is_empty() {
                        report.error("text payload is empty");
                    }
                    if text.chars().count() > 1000 {
                        report.warning("text payload exceeds 1000 characters");
                    }
                    if text
                        .chars()
                        .any(|c| (c as u32) < 32 && !matches!(c, '\t' | '\n' | '\r'))
                    {
                        report.warning("text payload contains control characters");
                    }
                }
            },
            ActionKind::Mouse {
                input,
                target_window,
                relative_to_window,
            } => {
                if input.position.x < MIN_COORDINATE || input.position.y < MIN_COORDINATE {
                    report.error(format!("coordinates below {MIN_COORDINATE}"));
                }
                if input.position.x > MAX_COORDINATE || input.position.y > MAX_COORDINATE {
                    report.error(format!("coordinates exceed {MAX_COORDINATE}"));
                }
                if input.position.dpi_scale <= 0.0 {
                    report.error("dpi scale must be positive");
                }
                if input.wheel_delta != 0 && input.button != MouseButton::Middle {
                    report.error("wheel delta requires the middle button");
                }
                if *relative_to_window && target_window.is_none() {
                    report.error("window-relative coordinates require a target window");
                }
            }
            ActionKind::Window { target, resize, .. } => {
                if target.is_empty() {
                    report.error("window target needs a title, class or process name");
                }
                if let Some((w, h)) = resize {
                    if *w == 0 || *h == 0 {
                        report.error("window size must be positive");
                    }
                }
            }
            ActionKind::Wait { duration_ms } => {
                if *duration_ms == 0 {
                    report.error("wait duration must be positive");
                }
                if *duration_ms > 60_000 {
                    report.warning("wait exceeds one minute");
                }
            }
        }

        report
    }

    /// Record the outcome of one synthesis attempt chain.
    pub fn mark_executed(&mut self, success: bool, error_message: Option<String>) {
        self.execution_count += 1;
        self.last_execution_time = Some(Utc::now());
        self.last_execution_result = Some(success);
        self.last_error_message = error_message;
    }

    /// Copy with a fresh identity and cleared runtime bookkeeping.
    pub fn clone_new_id(&self) -> Self {
        let mut cloned = self.clone();
        cloned.action_id = Uuid::new_v4();
        cloned.execution_count = 0;
        cloned.last_execution_time = None;
        cloned.last_execution_result = None;
        cloned.last_error_message = None;
        cloned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_input_auto_promotes_to_ime() {
        let action = Action::text_input("こんにちは", InputMethod::Direct);
        match &action.kind {
            ActionKind::Keyboard {
                payload: KeyboardPayload::Text { method, .. },
            } => assert_eq!(*method, InputMethod::Ime),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn ascii_text_stays_direct() {
        let action = Action::text_input("hello", InputMethod::Direct);
        match &action.kind {
            ActionKind::Keyboard {
                payload: KeyboardPayload::Text { method, .. },
            } => assert_eq!(*method, InputMethod::Direct),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn clipboard_method_is_not_promoted() {
        let action = Action::text_input("漢字", InputMethod::Clipboard);
        match &action.kind {
            ActionKind::Keyboard {
                payload: KeyboardPayload::Text { method, .. },
            } => assert_eq!(*method, InputMethod::Clipboard),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn wheel_delta_needs_middle_button() {
        assert!(MouseInput::new(MouseButton::Left, Coordinate::new(0, 0), false, 120).is_err());
        assert!(MouseInput::new(MouseButton::Middle, Coordinate::new(0, 0), false, 120).is_ok());
    }

    #[test]
    fn out_of_range_coordinate_is_invalid() {
        let too_far = Action::mouse_click(MouseButton::Left, Coordinate::new(MAX_COORDINATE + 1, 0));
        assert!(!too_far.validate().is_valid());

        let too_low = Action::mouse_click(MouseButton::Left, Coordinate::new(0, MIN_COORDINATE - 1));
        assert!(!too_low.validate().is_valid());

        // Negative coordinates inside the signed range are legitimate
        // (multi-monitor desktops extend left of the primary display).
        let negative = Action::mouse_click(MouseButton::Left, Coordinate::new(-100, -50));
        assert!(negative.validate().is_valid());
    }

    #[test]
    fn relative_mouse_without_target_is_invalid() {
        let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(10, 10));
        if let ActionKind::Mouse {
            relative_to_window, ..
        } = &mut action.kind
        {
            *relative_to_window = true;
        }
        assert!(!action.validate().is_valid());
    }

    #[test]
    fn empty_window_target_is_invalid() {
        let action = Action::window_activate(WindowTarget::default());
        assert!(!action.validate().is_valid());
    }

    #[test]
    fn zero_wait_is_invalid_and_long_wait_warns() {
        assert!(!Action::wait(0).validate().is_valid());
        let report = Action::wait(120_000).validate();
        assert!(report.is_valid());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn key_input_from_char() {
        let upper = KeyInput::from_char('G').unwrap();
        assert!(upper.shift);
        assert_eq!(upper.key_code, 'G' as u32);
        let digit = KeyInput::from_char('7').unwrap();
        assert!(!digit.shift);
        assert_eq!(digit.key_code, '7' as u32);
        assert!(KeyInput::from_char('€').is_err());
    }

    #[test]
    fn serde_round_trip_preserves_kind() {
        let action = Action::mouse_click(MouseButton::Right, Coordinate::new(100, 200));
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, action.kind);
        assert_eq!(back.action_id, action.action_id);
    }

    #[test]
    fn clone_new_id_resets_runtime_state() {
        let mut action = Action::wait(100);
        action.mark_executed(true, None);
        let cloned = action.clone_new_id();
        assert_ne!(cloned.action_id, action.action_id);
        assert_eq!(cloned.execution_count, 0);
        assert!(cloned.last_execution_result.is_none());
    }
}
