//! Test doubles shared by this crate's tests and the recorder crate:
//! a scriptable sink and a settable clock. Not part of the public API
//! surface proper.

use crate::action::{
    Action, ActionKind, InputMethod, KeyInput, KeyboardPayload, MouseInput, WindowTarget,
};
use crate::clock::{CancelToken, Clock, SleepOutcome};
use crate::errors::{Result, RpaError};
use crate::sink::{InputSink, WindowHandle, WindowRect};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Remaining scripted failures for one action.
struct FailurePlan {
    error: RpaError,
    remaining: u32,
}

/// An [`InputSink`] that records everything and fails on request.
#[derive(Default)]
pub struct MockSink {
    executed: Mutex<Vec<Action>>,
    attempts: Mutex<Vec<Uuid>>,
    typed: Mutex<Vec<String>>,
    failures: Mutex<HashMap<Uuid, FailurePlan>>,
    windows: Mutex<HashMap<String, WindowHandle>>,
    foreground: Mutex<Option<WindowHandle>>,
    activated: Mutex<Vec<WindowHandle>>,
    execute_delay: Mutex<Duration>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` executions of `action_id` fail with `error`.
    pub fn fail_action(&self, action_id: Uuid, error: RpaError, times: u32) {
        self.failures.lock().unwrap().insert(
            action_id,
            FailurePlan {
                error,
                remaining: times,
            },
        );
    }

    /// Make every execution block for `delay` of real time first.
    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap() = delay;
    }

    /// Register a findable window by title.
    pub fn add_window(&self, title: &str, handle: WindowHandle) {
        self.windows.lock().unwrap().insert(title.to_string(), handle);
    }

    pub fn set_foreground(&self, handle: Option<WindowHandle>) {
        *self.foreground.lock().unwrap() = handle;
    }

    pub fn executed_actions(&self) -> Vec<Action> {
        self.executed.lock().unwrap().clone()
    }

    pub fn attempt_count(&self, action_id: Uuid) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == action_id)
            .count()
    }

    pub fn typed_texts(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }

    pub fn activated_handles(&self) -> Vec<WindowHandle> {
        self.activated.lock().unwrap().clone()
    }

    fn scripted_failure(&self, action_id: Uuid) -> Option<RpaError> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(plan) = failures.get_mut(&action_id) {
            if plan.remaining > 0 {
                plan.remaining -= 1;
                return Some(plan.error.clone());
            }
        }
        None
    }
}

impl InputSink for MockSink {
    fn press_key(&self, _input: &KeyInput) -> Result<()> {
        Ok(())
    }

    fn move_and_click(&self, _input: &MouseInput) -> Result<()> {
        Ok(())
    }

    fn type_text(&self, text: &str, _method: InputMethod) -> Result<()> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn find_window(&self, target: &WindowTarget) -> Result<WindowHandle> {
        self.windows
            .lock()
            .unwrap()
            .get(&target.title)
            .copied()
            .ok_or_else(|| RpaError::WindowNotFound(target.title.clone()))
    }

    fn activate_window(&self, handle: WindowHandle) -> Result<()> {
        self.activated.lock().unwrap().push(handle);
        Ok(())
    }

    fn move_window(&self, _handle: WindowHandle, _rect: WindowRect) -> Result<()> {
        Ok(())
    }

    fn window_rect(&self, _handle: WindowHandle) -> Result<WindowRect> {
        Ok(WindowRect {
            x: 0,
            y: 0,
            width: 800,
            height: 600,
        })
    }

    fn foreground_window(&self) -> Result<Option<WindowHandle>> {
        Ok(*self.foreground.lock().unwrap())
    }

    fn execute(&self, action: &Action) -> Result<()> {
        let delay = *self.execute_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.attempts.lock().unwrap().push(action.action_id);
        if let Some(error) = self.scripted_failure(action.action_id) {
            return Err(error);
        }
        if let ActionKind::Keyboard {
            payload: KeyboardPayload::Text { text, .. },
        } = &action.kind
        {
            self.typed.lock().unwrap().push(text.clone());
        }
        self.executed.lock().unwrap().push(action.clone());
        Ok(())
    }
}

/// A [`Clock`] whose wall time the test sets. Sleeps advance the wall time
/// by the requested duration but block only briefly, so timed logic runs
/// at test speed while still honoring cancellation.
pub struct ManualClock {
    wall: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            wall: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn set_wall(&self, at: DateTime<Utc>) {
        *self.wall.lock().unwrap() = at;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut wall = self.wall.lock().unwrap();
        *wall += by;
    }

    /// Sleep durations requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now_wall(&self) -> DateTime<Utc> {
        *self.wall.lock().unwrap()
    }

    fn now_mono(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, token: &CancelToken) -> SleepOutcome {
        self.sleeps.lock().unwrap().push(duration);
        {
            let mut wall = self.wall.lock().unwrap();
            *wall += ChronoDuration::milliseconds(duration.as_millis() as i64);
        }
        token.wait(Duration::from_micros(200))
    }
}
