//! Global hotkey dispatch.
//!
//! A process-wide registry of canonical chord strings to callbacks, fed by
//! a global input listener that tracks modifier state. Dispatch is
//! independent of the capture filter: a chord suppressed from a recording
//! still fires its registered callback.

use crate::errors::{Result, RpaError};
use crate::keys::{is_modifier_key_name, normalize_key_name, KeyChord};
use rdev::{Event, EventType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use tracing::{debug, error, info, warn};

pub type HotkeyCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Modifier state of the listener thread. Left and right variants are
/// counted separately so releasing one side does not clear the flag while
/// the other side is still held.
#[derive(Debug, Default, Clone, Copy)]
struct ModifierState {
    ctrl_left: bool,
    ctrl_right: bool,
    alt: bool,
    alt_gr: bool,
    shift_left: bool,
    shift_right: bool,
    meta_left: bool,
    meta_right: bool,
}

impl ModifierState {
    fn ctrl(&self) -> bool {
        self.ctrl_left || self.ctrl_right
    }
    fn alt(&self) -> bool {
        self.alt || self.alt_gr
    }
    fn shift(&self) -> bool {
        self.shift_left || self.shift_right
    }
    fn win(&self) -> bool {
        self.meta_left || self.meta_right
    }

    fn apply(&mut self, name: &str, pressed: bool) {
        match name {
            "controlleft" | "ctrlleft" => self.ctrl_left = pressed,
            "controlright" | "ctrlright" => self.ctrl_right = pressed,
            "alt" | "altleft" => self.alt = pressed,
            "altgr" | "altright" => self.alt_gr = pressed,
            "shiftleft" => self.shift_left = pressed,
            "shiftright" => self.shift_right = pressed,
            "metaleft" => self.meta_left = pressed,
            "metaright" => self.meta_right = pressed,
            _ => {}
        }
    }
}

/// The global dispatcher. `register` keys on the canonical chord form, so
/// `"Shift+Ctrl+R"` and `"ctrl+shift+r"` address the same slot.
pub struct HotkeyDispatcher {
    registry: Arc<RwLock<HashMap<String, HotkeyCallback>>>,
    stop: Arc<AtomicBool>,
}

impl Default for HotkeyDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HotkeyDispatcher {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a callback. A chord can hold one callback at a time.
    pub fn register<F>(&self, chord: &KeyChord, callback: F) -> Result<()>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let canonical = chord.canonical();
        let mut registry = self
            .registry
            .write()
            .map_err(|_| RpaError::Storage("hotkey registry poisoned".to_string()))?;
        if registry.contains_key(&canonical) {
            return Err(RpaError::Validation(format!(
                "chord {canonical} is already registered"
            )));
        }
        debug!(chord = %canonical, "hotkey registered");
        registry.insert(canonical, Arc::new(callback));
        Ok(())
    }

    pub fn unregister(&self, chord: &KeyChord) -> bool {
        self.registry
            .write()
            .map(|mut registry| registry.remove(&chord.canonical()).is_some())
            .unwrap_or(false)
    }

    pub fn registered_chords(&self) -> Vec<String> {
        self.registry
            .read()
            .map(|registry| registry.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fire the callback bound to `chord`, if any. The callback runs
    /// outside the registry lock; its errors are logged and swallowed so
    /// the listener never dies.
    pub fn dispatch(&self, chord: &KeyChord) -> bool {
        let callback = {
            let registry = match self.registry.read() {
                Ok(registry) => registry,
                Err(_) => return false,
            };
            registry.get(&chord.canonical()).cloned()
        };
        match callback {
            Some(callback) => {
                if let Err(e) = callback() {
                    error!(chord = %chord.canonical(), "hotkey callback failed: {e}");
                }
                true
            }
            None => false,
        }
    }

    /// Install the global listener. The listener thread tracks modifier
    /// state and dispatches on every non-modifier key press.
    pub fn start(&self) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let stop = Arc::clone(&self.stop);
        self.stop.store(false, Ordering::SeqCst);

        let dispatcher = HotkeyDispatcher {
            registry,
            stop: Arc::clone(&stop),
        };

        thread::Builder::new()
            .name("ezrec-hotkeys".to_string())
            .spawn(move || {
                let mut modifiers = ModifierState::default();
                info!("hotkey listener started");
                let result = rdev::listen(move |event: Event| {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    match event.event_type {
                        EventType::KeyPress(key) => {
                            let raw = format!("{key:?}");
                            if is_modifier_key_name(&raw) {
                                modifiers.apply(&raw.to_lowercase(), true);
                                return;
                            }
                            let chord = KeyChord::new(
                                modifiers.ctrl(),
                                modifiers.alt(),
                                modifiers.shift(),
                                modifiers.win(),
                                &normalize_key_name(&raw),
                            );
                            dispatcher.dispatch(&chord);
                        }
                        EventType::KeyRelease(key) => {
                            let raw = format!("{key:?}");
                            if is_modifier_key_name(&raw) {
                                modifiers.apply(&raw.to_lowercase(), false);
                            }
                        }
                        _ => {}
                    }
                });
                if let Err(e) = result {
                    warn!("hotkey listener unavailable: {e:?}");
                }
            })
            .map_err(|e| RpaError::CaptureUnavailable(format!("hotkey listener: {e}")))?;
        Ok(())
    }

    /// Tell the listener to ignore further events. The OS hook itself
    /// lives until process exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
