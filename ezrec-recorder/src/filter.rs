//! Event filtering: modifier-state tracking, exclusion rules and control
//! chord recognition.
//!
//! The filter sits between the raw hook stream and the capture engine. It
//! never reorders events; it only decides, per event, whether downstream
//! sees it.

use crate::events::{CaptureEvent, RawEvent, RawEventKind};
use ezrec::keys::{is_modifier_key_name, normalize_key_name, vk_for_key_name};
use ezrec::shortcuts::{ControlAction, ShortcutSettings};
use std::collections::HashSet;
use tracing::debug;

/// What the filter decided about one raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    /// Forward to the capture engine.
    Forward(CaptureEvent),
    /// A reserved RPA control chord; suppressed from the capture stream.
    Control(ControlAction),
    /// Suppressed (excluded chord, lone modifier, unmapped key).
    Drop,
}

/// Stateful filter over one capture session.
///
/// Modifier state counts held sides per modifier: releasing the left
/// shift while the right is down keeps the shift flag set.
pub struct EventFilter {
    settings: ShortcutSettings,
    held_modifiers: HashSet<String>,
}

impl EventFilter {
    pub fn new(settings: ShortcutSettings) -> Self {
        Self {
            settings,
            held_modifiers: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &ShortcutSettings {
        &self.settings
    }

    fn ctrl(&self) -> bool {
        self.any_held(&["controlleft", "controlright", "ctrlleft", "ctrlright"])
    }

    fn alt(&self) -> bool {
        self.any_held(&["alt", "altleft", "altgr", "altright"])
    }

    fn shift(&self) -> bool {
        self.any_held(&["shiftleft", "shiftright"])
    }

    fn win(&self) -> bool {
        self.any_held(&["metaleft", "metaright"])
    }

    fn any_held(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.held_modifiers.contains(*n))
    }

    pub fn process(&mut self, event: &RawEvent) -> FilterDecision {
        match &event.kind {
            RawEventKind::KeyDown { name } => {
                if is_modifier_key_name(name) {
                    // Key repeat re-delivers the press; the set is
                    // idempotent under that.
                    self.held_modifiers.insert(name.to_lowercase());
                    return FilterDecision::Drop;
                }

                let key = normalize_key_name(name);
                let (ctrl, alt, shift, win) = (self.ctrl(), self.alt(), self.shift(), self.win());

                if let Some(action) = self.settings.control_action(ctrl, alt, shift, win, &key) {
                    debug!(?action, "control chord recognized");
                    return FilterDecision::Control(action);
                }
                if self.settings.should_exclude(ctrl, alt, shift, win, &key) {
                    debug!(%key, "excluded chord suppressed");
                    return FilterDecision::Drop;
                }
                match vk_for_key_name(&key) {
                    Some(vk) => FilterDecision::Forward(CaptureEvent::Chord {
                        key,
                        vk,
                        ctrl,
                        alt,
                        shift,
                        win,
                    }),
                    None => {
                        debug!(%key, "unmapped key dropped");
                        FilterDecision::Drop
                    }
                }
            }
            RawEventKind::KeyUp { name } => {
                if is_modifier_key_name(name) {
                    self.held_modifiers.remove(&name.to_lowercase());
                }
                // Non-modifier releases are implied by the chord event.
                FilterDecision::Drop
            }
            RawEventKind::MouseMove { x, y } => {
                FilterDecision::Forward(CaptureEvent::MouseMove { x: *x, y: *y })
            }
            RawEventKind::ButtonDown { button, x, y } => {
                FilterDecision::Forward(CaptureEvent::ButtonDown {
                    button: *button,
                    x: *x,
                    y: *y,
                })
            }
            RawEventKind::ButtonUp { button, x, y } => {
                FilterDecision::Forward(CaptureEvent::ButtonUp {
                    button: *button,
                    x: *x,
                    y: *y,
                })
            }
            RawEventKind::Wheel { delta, x, y } => FilterDecision::Forward(CaptureEvent::Wheel {
                delta: *delta,
                x: *x,
                y: *y,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezrec::MouseButton;

    fn key_down(name: &str) -> RawEvent {
        RawEvent::new(RawEventKind::KeyDown {
            name: name.to_string(),
        })
    }

    fn key_up(name: &str) -> RawEvent {
        RawEvent::new(RawEventKind::KeyUp {
            name: name.to_string(),
        })
    }

    #[test]
    fn plain_key_is_forwarded_with_flags() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        match filter.process(&key_down("KeyA")) {
            FilterDecision::Forward(CaptureEvent::Chord {
                key, ctrl, shift, ..
            }) => {
                assert_eq!(key, "a");
                assert!(!ctrl && !shift);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn lone_modifier_press_is_dropped() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        assert_eq!(filter.process(&key_down("ShiftLeft")), FilterDecision::Drop);
        assert_eq!(filter.process(&key_up("ShiftLeft")), FilterDecision::Drop);
    }

    #[test]
    fn excluded_clipboard_chord_is_suppressed() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        filter.process(&key_down("ControlLeft"));
        assert_eq!(filter.process(&key_down("KeyC")), FilterDecision::Drop);
        filter.process(&key_up("ControlLeft"));
        // Same key without the modifier is ordinary input.
        assert!(matches!(
            filter.process(&key_down("KeyC")),
            FilterDecision::Forward(_)
        ));
    }

    #[test]
    fn control_chord_is_recognized_and_suppressed() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        filter.process(&key_down("ControlLeft"));
        filter.process(&key_down("ShiftLeft"));
        assert_eq!(
            filter.process(&key_down("KeyR")),
            FilterDecision::Control(ControlAction::StartStop)
        );
        assert_eq!(
            filter.process(&key_down("KeyQ")),
            FilterDecision::Control(ControlAction::EmergencyStop)
        );
    }

    #[test]
    fn releasing_one_side_keeps_flag_while_other_held() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        filter.process(&key_down("ShiftLeft"));
        filter.process(&key_down("ShiftRight"));
        filter.process(&key_up("ShiftLeft"));
        match filter.process(&key_down("KeyX")) {
            FilterDecision::Forward(CaptureEvent::Chord { shift, .. }) => assert!(shift),
            other => panic!("unexpected decision: {other:?}"),
        }
        filter.process(&key_up("ShiftRight"));
        match filter.process(&key_down("KeyX")) {
            FilterDecision::Forward(CaptureEvent::Chord { shift, .. }) => assert!(!shift),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn modifier_key_repeat_is_idempotent() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        filter.process(&key_down("ControlLeft"));
        filter.process(&key_down("ControlLeft"));
        filter.process(&key_up("ControlLeft"));
        match filter.process(&key_down("KeyX")) {
            FilterDecision::Forward(CaptureEvent::Chord { ctrl, .. }) => assert!(!ctrl),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn mouse_events_pass_unconditionally() {
        let mut filter = EventFilter::new(ShortcutSettings::default());
        assert!(matches!(
            filter.process(&RawEvent::new(RawEventKind::ButtonDown {
                button: MouseButton::Left,
                x: 1,
                y: 2
            })),
            FilterDecision::Forward(CaptureEvent::ButtonDown { .. })
        ));
        assert!(matches!(
            filter.process(&RawEvent::new(RawEventKind::MouseMove { x: 5, y: 6 })),
            FilterDecision::Forward(CaptureEvent::MouseMove { .. })
        ));
    }

    #[test]
    fn custom_exclusion_applies() {
        let mut settings = ShortcutSettings::default();
        settings.add_custom_excluded_key(ezrec::KeyChord::ctrl("k"));
        let mut filter = EventFilter::new(settings);
        filter.process(&key_down("ControlLeft"));
        assert_eq!(filter.process(&key_down("KeyK")), FilterDecision::Drop);
    }
}
