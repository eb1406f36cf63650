//! Event types flowing through the capture pipeline.
//!
//! `RawEvent` is what the OS hook produces: uninterpreted, monotonic,
//! single-producer. `CaptureEvent` is what survives the filter: chords
//! with resolved modifier flags, plus the unconditionally forwarded mouse
//! traffic.

use ezrec::MouseButton;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Uninterpreted event from the input hook.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: RawEventKind,
    /// Monotonic capture timestamp; all intra-recording ordering and
    /// delay arithmetic uses this, never the wall clock.
    pub monotonic: Instant,
}

impl RawEvent {
    pub fn new(kind: RawEventKind) -> Self {
        Self {
            kind,
            monotonic: Instant::now(),
        }
    }

    pub fn at(kind: RawEventKind, monotonic: Instant) -> Self {
        Self { kind, monotonic }
    }
}

/// Raw event payloads. Key names are the hook's own (`KeyA`, `ShiftLeft`,
/// `Return`); normalization is the filter's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEventKind {
    KeyDown { name: String },
    KeyUp { name: String },
    MouseMove { x: i32, y: i32 },
    ButtonDown { button: MouseButton, x: i32, y: i32 },
    ButtonUp { button: MouseButton, x: i32, y: i32 },
    Wheel { delta: i32, x: i32, y: i32 },
}

/// A filtered event ready for materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Non-modifier key press with the modifier flags that were held.
    /// One chord produces exactly one of these; lone modifier presses
    /// never appear.
    Chord {
        key: String,
        vk: u32,
        ctrl: bool,
        alt: bool,
        shift: bool,
        win: bool,
    },
    MouseMove {
        x: i32,
        y: i32,
    },
    ButtonDown {
        button: MouseButton,
        x: i32,
        y: i32,
    },
    ButtonUp {
        button: MouseButton,
        x: i32,
        y: i32,
    },
    Wheel {
        delta: i32,
        x: i32,
        y: i32,
    },
}
