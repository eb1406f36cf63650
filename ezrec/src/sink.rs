//! Input synthesis adapter.
//!
//! `InputSink` is the seam between the replay engine and the OS input
//! layer: key chords, mouse clicks/wheel, text entry and window control.
//! `SystemSink` synthesizes through the global event queue; window
//! management goes through a pluggable [`WindowBackend`] so replay logic
//! stays testable off the target desktop.

use crate::action::{
    vk, Action, ActionKind, Coordinate, InputMethod, KeyInput, KeyboardPayload, MouseButton,
    MouseInput, WindowTarget,
};
use crate::errors::{Result, RpaError};
use once_cell::sync::Lazy;
use rdev::{Button, EventType, Key};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Opaque platform window identifier.
pub type WindowHandle = u64;

/// Window geometry for move/resize operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// The clipboard is shared with the user; both the `clipboard` text method
/// and the custom command runner serialize their save/write/paste/restore
/// sequences through this process-local lock.
static CLIPBOARD_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Upper bound on the save/write/paste critical section.
const CLIPBOARD_SECTION: Duration = Duration::from_millis(500);

/// Best-effort restore window after a paste.
const CLIPBOARD_RESTORE_BOUND: Duration = Duration::from_secs(1);

/// Window lookup and control. Separated from input synthesis because the
/// desktop window system is a platform concern the engine only consumes.
pub trait WindowBackend: Send + Sync {
    fn find_window(&self, target: &WindowTarget) -> Result<WindowHandle>;
    fn activate(&self, handle: WindowHandle) -> Result<()>;
    fn move_window(&self, handle: WindowHandle, rect: WindowRect) -> Result<()>;
    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect>;
    /// Currently focused window, when the platform can tell.
    fn foreground_window(&self) -> Result<Option<WindowHandle>>;
}

/// Backend for hosts without a supported window system. Every operation
/// fails with `UnsupportedPlatform`, which replay policy treats like any
/// other per-action error.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWindowBackend;

impl WindowBackend for NoopWindowBackend {
    fn find_window(&self, target: &WindowTarget) -> Result<WindowHandle> {
        Err(RpaError::UnsupportedPlatform(format!(
            "window lookup for '{}'",
            target.title
        )))
    }

    fn activate(&self, _handle: WindowHandle) -> Result<()> {
        Err(RpaError::UnsupportedPlatform("window activation".to_string()))
    }

    fn move_window(&self, _handle: WindowHandle, _rect: WindowRect) -> Result<()> {
        Err(RpaError::UnsupportedPlatform("window move".to_string()))
    }

    fn window_rect(&self, _handle: WindowHandle) -> Result<WindowRect> {
        Err(RpaError::UnsupportedPlatform("window geometry".to_string()))
    }

    fn foreground_window(&self) -> Result<Option<WindowHandle>> {
        Ok(None)
    }
}

/// OS input synthesis primitives consumed by the replay engine and the
/// custom command runner.
pub trait InputSink: Send + Sync {
    fn press_key(&self, input: &KeyInput) -> Result<()>;
    fn move_and_click(&self, input: &MouseInput) -> Result<()>;
    fn type_text(&self, text: &str, method: InputMethod) -> Result<()>;

    fn find_window(&self, target: &WindowTarget) -> Result<WindowHandle>;
    fn activate_window(&self, handle: WindowHandle) -> Result<()>;
    fn move_window(&self, handle: WindowHandle, rect: WindowRect) -> Result<()>;
    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect>;
    fn foreground_window(&self) -> Result<Option<WindowHandle>>;

    /// DPI scale of the primary display at replay time, as a ratio to the
    /// 96-dpi baseline.
    fn current_dpi_scale(&self) -> f64 {
        1.0
    }

    /// Synthesize one action. Wait actions are the replay engine's job
    /// (pure sleep) and return Ok here without touching the OS.
    fn execute(&self, action: &Action) -> Result<()> {
        match &action.kind {
            ActionKind::Keyboard { payload } => match payload {
                KeyboardPayload::Keys(input) => self.press_key(input),
                KeyboardPayload::Text { text, method } => self.type_text(text, *method),
            },
            ActionKind::Mouse { input, .. } => {
                let scaled = rescale_for_replay(input.position, self.current_dpi_scale());
                let replay_input = MouseInput {
                    position: scaled,
                    ..input.clone()
                };
                self.move_and_click(&replay_input)
            }
            ActionKind::Window {
                target,
                activate,
                move_to,
                resize,
            } => {
                let handle = self.find_window(target)?;
                if *activate {
                    self.activate_window(handle)?;
                }
                if move_to.is_some() || resize.is_some() {
                    let current = self.window_rect(handle)?;
                    let (x, y) = move_to.unwrap_or((current.x, current.y));
                    let (width, height) = resize.unwrap_or((current.width, current.height));
                    self.move_window(
                        handle,
                        WindowRect {
                            x,
                            y,
                            width,
                            height,
                        },
                    )?;
                }
                Ok(())
            }
            ActionKind::Wait { .. } => Ok(()),
        }
    }
}

/// Captured coordinates are normalized by their capture-time DPI scale and
/// reprojected onto the replay display.
fn rescale_for_replay(position: Coordinate, current_scale: f64) -> Coordinate {
    if position.dpi_scale <= 0.0 || (position.dpi_scale - current_scale).abs() < f64::EPSILON {
        return position;
    }
    position.scaled(current_scale / position.dpi_scale)
}

/// The real sink: global input synthesis plus a window backend.
pub struct SystemSink {
    window_backend: Box<dyn WindowBackend>,
    dpi_scale: f64,
    /// Gap between synthesized events; some hosts drop events injected
    /// back-to-back.
    event_gap: Duration,
}

impl SystemSink {
    pub fn new() -> Self {
        Self {
            window_backend: Box::new(NoopWindowBackend),
            dpi_scale: 1.0,
            event_gap: Duration::from_millis(10),
        }
    }

    pub fn with_window_backend(mut self, backend: Box<dyn WindowBackend>) -> Self {
        self.window_backend = backend;
        self
    }

    pub fn with_dpi_scale(mut self, dpi_scale: f64) -> Self {
        self.dpi_scale = dpi_scale;
        self
    }

    fn send(&self, event: EventType) -> Result<()> {
        rdev::simulate(&event)
            .map_err(|_| RpaError::SynthesisFailed(format!("simulate {event:?}")))?;
        thread::sleep(self.event_gap);
        Ok(())
    }

    fn tap_key(&self, key: Key) -> Result<()> {
        self.send(EventType::KeyPress(key))?;
        self.send(EventType::KeyRelease(key))
    }

    /// Clipboard round trip: save, write payload, paste, restore. Runs
    /// under the process clipboard lock; restoration is best-effort and
    /// bounded, so a concurrent foreground app may still win the race.
    fn paste_via_clipboard(&self, text: &str) -> Result<()> {
        let _guard = CLIPBOARD_MUTEX
            .lock()
            .map_err(|_| RpaError::SynthesisFailed("clipboard lock poisoned".to_string()))?;
        let section_start = Instant::now();

        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| RpaError::SinkUnavailable(format!("clipboard: {e}")))?;
        let saved = clipboard.get_text().ok();

        clipboard
            .set_text(text.to_string())
            .map_err(|e| RpaError::SynthesisFailed(format!("clipboard write: {e}")))?;

        self.send(EventType::KeyPress(Key::ControlLeft))?;
        self.tap_key(Key::KeyV)?;
        self.send(EventType::KeyRelease(Key::ControlLeft))?;

        if section_start.elapsed() > CLIPBOARD_SECTION {
            debug!(
                elapsed_ms = section_start.elapsed().as_millis() as u64,
                "clipboard critical section overran"
            );
        }

        // Give the paste consumer a moment, then restore what was there.
        if let Some(previous) = saved {
            let deadline = Instant::now() + CLIPBOARD_RESTORE_BOUND;
            thread::sleep(Duration::from_millis(100));
            loop {
                match clipboard.set_text(previous.clone()) {
                    Ok(()) => break,
                    Err(e) if Instant::now() < deadline => {
                        debug!("clipboard restore retry: {e}");
                        thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        warn!("clipboard restore abandoned: {e}");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for SystemSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSink for SystemSink {
    fn press_key(&self, input: &KeyInput) -> Result<()> {
        let mut modifiers: Vec<Key> = Vec::new();
        if input.ctrl {
            modifiers.push(Key::ControlLeft);
        }
        if input.alt {
            modifiers.push(Key::Alt);
        }
        if input.shift {
            modifiers.push(Key::ShiftLeft);
        }
        if input.win {
            modifiers.push(Key::MetaLeft);
        }

        let key = key_for_vk(input.key_code);
        for m in &modifiers {
            self.send(EventType::KeyPress(*m))?;
        }
        let result = self.tap_key(key);
        for m in modifiers.iter().rev() {
            // Always release held modifiers, even if the tap failed.
            let _ = self.send(EventType::KeyRelease(*m));
        }
        result
    }

    fn move_and_click(&self, input: &MouseInput) -> Result<()> {
        self.send(EventType::MouseMove {
            x: input.position.x as f64,
            y: input.position.y as f64,
        })?;

        if input.wheel_delta != 0 {
            return self.send(EventType::Wheel {
                delta_x: 0,
                delta_y: input.wheel_delta as i64,
            });
        }

        let button = match input.button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
            MouseButton::X1 => Button::Unknown(4),
            MouseButton::X2 => Button::Unknown(5),
        };
        let clicks = if input.double_click { 2 } else { 1 };
        for _ in 0..clicks {
            self.send(EventType::ButtonPress(button))?;
            self.send(EventType::ButtonRelease(button))?;
        }
        Ok(())
    }

    fn type_text(&self, text: &str, method: InputMethod) -> Result<()> {
        match method {
            InputMethod::Direct => {
                // Per-keystroke entry; anything the key map cannot express
                // falls back to the clipboard path for the whole payload.
                let mut inputs = Vec::with_capacity(text.len());
                for c in text.chars() {
                    match KeyInput::from_char(c) {
                        Ok(input) => inputs.push(input),
                        Err(_) => return self.paste_via_clipboard(text),
                    }
                }
                for input in &inputs {
                    self.press_key(input)?;
                }
                Ok(())
            }
            // Composition is owned by the host IME; handing it the payload
            // through the paste buffer lets the IME commit it verbatim.
            InputMethod::Ime | InputMethod::Clipboard => self.paste_via_clipboard(text),
        }
    }

    fn find_window(&self, target: &WindowTarget) -> Result<WindowHandle> {
        self.window_backend.find_window(target)
    }

    fn activate_window(&self, handle: WindowHandle) -> Result<()> {
        self.window_backend.activate(handle)
    }

    fn move_window(&self, handle: WindowHandle, rect: WindowRect) -> Result<()> {
        self.window_backend.move_window(handle, rect)
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect> {
        self.window_backend.window_rect(handle)
    }

    fn foreground_window(&self) -> Result<Option<WindowHandle>> {
        self.window_backend.foreground_window()
    }

    fn current_dpi_scale(&self) -> f64 {
        self.dpi_scale
    }
}

/// Virtual-key code to synthesis key. Unmapped codes pass through raw.
fn key_for_vk(code: u32) -> Key {
    match code {
        c if (0x41..=0x5A).contains(&c) => letter_key(c),
        c if (0x30..=0x39).contains(&c) => digit_key(c),
        c if (vk::F1..vk::F1 + 12).contains(&c) => function_key(c - vk::F1),
        vk::BACK => Key::Backspace,
        vk::TAB => Key::Tab,
        vk::RETURN => Key::Return,
        vk::ESCAPE => Key::Escape,
        vk::SPACE => Key::Space,
        vk::PRIOR => Key::PageUp,
        vk::NEXT => Key::PageDown,
        vk::END => Key::End,
        vk::HOME => Key::Home,
        vk::LEFT => Key::LeftArrow,
        vk::UP => Key::UpArrow,
        vk::RIGHT => Key::RightArrow,
        vk::DOWN => Key::DownArrow,
        vk::INSERT => Key::Insert,
        vk::DELETE => Key::Delete,
        vk::LWIN => Key::MetaLeft,
        other => Key::Unknown(other),
    }
}

fn letter_key(code: u32) -> Key {
    const LETTERS: [Key; 26] = [
        Key::KeyA,
        Key::KeyB,
        Key::KeyC,
        Key::KeyD,
        Key::KeyE,
        Key::KeyF,
        Key::KeyG,
        Key::KeyH,
        Key::KeyI,
        Key::KeyJ,
        Key::KeyK,
        Key::KeyL,
        Key::KeyM,
        Key::KeyN,
        Key::KeyO,
        Key::KeyP,
        Key::KeyQ,
        Key::KeyR,
        Key::KeyS,
        Key::KeyT,
        Key::KeyU,
        Key::KeyV,
        Key::KeyW,
        Key::KeyX,
        Key::KeyY,
        Key::KeyZ,
    ];
    LETTERS[(code - 0x41) as usize]
}

fn digit_key(code: u32) -> Key {
    const DIGITS: [Key; 10] = [
        Key::Num0,
        Key::Num1,
        Key::Num2,
        Key::Num3,
        Key::Num4,
        Key::Num5,
        Key::Num6,
        Key::Num7,
        Key::Num8,
        Key::Num9,
    ];
    DIGITS[(code - 0x30) as usize]
}

fn function_key(index: u32) -> Key {
    const FKEYS: [Key; 12] = [
        Key::F1,
        Key::F2,
        Key::F3,
        Key::F4,
        Key::F5,
        Key::F6,
        Key::F7,
        Key::F8,
        Key::F9,
        Key::F10,
        Key::F11,
        Key::F12,
    ];
    FKEYS[index as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_mapping_covers_letters_digits_and_named_keys() {
        assert_eq!(key_for_vk(0x41), Key::KeyA);
        assert_eq!(key_for_vk(0x5A), Key::KeyZ);
        assert_eq!(key_for_vk(0x30), Key::Num0);
        assert_eq!(key_for_vk(vk::F1 + 11), Key::F12);
        assert_eq!(key_for_vk(vk::RETURN), Key::Return);
        assert_eq!(key_for_vk(0xE9), Key::Unknown(0xE9));
    }

    #[test]
    fn rescale_uses_dpi_ratio() {
        let captured = Coordinate::with_dpi(100, 200, 1.0);
        let scaled = rescale_for_replay(captured, 2.0);
        assert_eq!((scaled.x, scaled.y), (200, 400));

        let same = rescale_for_replay(Coordinate::with_dpi(100, 200, 1.5), 1.5);
        assert_eq!((same.x, same.y), (100, 200));
    }

    #[test]
    fn noop_backend_reports_unsupported() {
        let backend = NoopWindowBackend;
        assert!(matches!(
            backend.find_window(&WindowTarget::by_title("x")),
            Err(RpaError::UnsupportedPlatform(_))
        ));
        assert_eq!(backend.foreground_window().unwrap(), None);
    }
}
