//! Input capture for the ezrec RPA engine.
//!
//! A platform hook streams raw key/mouse events into a bounded channel;
//! the event filter applies exclusion rules, tracks modifier state and
//! recognizes the reserved control chords; the capture engine materializes
//! what is left into an ordered [`ezrec::Recording`].

mod engine;
mod error;
mod events;
mod filter;
mod source;

pub use engine::{CaptureConfig, CaptureEngine, CaptureState, Recorder};
pub use error::{RecorderError, Result};
pub use events::{CaptureEvent, RawEvent, RawEventKind};
pub use filter::{EventFilter, FilterDecision};
pub use source::{ChannelSource, InputSource, RdevSource};
