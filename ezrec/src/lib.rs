//! Desktop RPA engine core.
//!
//! This crate holds everything downstream of capture: the domain model
//! (actions, recordings, schedules, shortcut settings), encrypted
//! content-addressed storage with a SQLite index, the timeline replay
//! engine, the trigger scheduler, the global hotkey dispatcher and the
//! custom shortcut command runner. Input capture lives in the companion
//! `ezrec-recorder` crate.

pub mod action;
pub mod clock;
pub mod commands;
pub mod context;
pub mod errors;
pub mod hotkeys;
pub mod keys;
pub mod recording;
pub mod replay;
pub mod schedule;
pub mod scheduler;
pub mod shortcuts;
pub mod sink;
pub mod storage;

#[doc(hidden)]
pub mod testkit;

pub use action::{
    Action, ActionKind, Coordinate, InputMethod, KeyInput, KeyboardPayload, MouseButton,
    MouseInput, ValidationReport, WindowTarget,
};
pub use clock::{CancelToken, Clock, SleepOutcome, SystemClock};
pub use commands::{CommandOutcome, CommandRunner, HostInspector};
pub use context::RpaContext;
pub use errors::{Result, RpaError};
pub use hotkeys::{HotkeyCallback, HotkeyDispatcher};
pub use keys::KeyChord;
pub use recording::{
    ExecutionSummary, PlaybackSettings, Recording, RecordingMetadata, RecordingStatus,
};
pub use replay::{PlaybackEvent, PlaybackOutcome, PlaybackResult, Player};
pub use schedule::{
    ExecutionResult, RepeatRule, RepeatUnit, Schedule, ScheduleStatus, TimeOfDay, TriggerCondition,
};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use shortcuts::{
    CommandParameter, CommandType, ControlAction, CustomShortcutCommand, ShortcutSettings,
};
pub use sink::{InputSink, SystemSink, WindowBackend, WindowHandle, WindowRect};
pub use storage::{RecordingSummary, Storage, StorageConfig, StorageStats};
