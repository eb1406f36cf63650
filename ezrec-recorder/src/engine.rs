//! Capture engine: materializes filtered events into a Recording.
//!
//! States: `Idle → Recording ⇄ Paused → Completed | Cancelled`. Matched
//! button press/release pairs coalesce into clicks (and double-clicks),
//! unmodified printable keys coalesce into text runs, and inter-action
//! timing lands in `delay_before` as the monotonic delta since the
//! previous materialized action. Paused wall-time never appears in a
//! recording.

use crate::error::{RecorderError, Result};
use crate::events::CaptureEvent;
use crate::filter::{EventFilter, FilterDecision};
use crate::source::InputSource;
use ezrec::shortcuts::ControlAction;
use ezrec::storage::{canonical_bytes, crypto};
use ezrec::{
    Action, Coordinate, InputMethod, KeyInput, MouseButton, MouseInput, Recording,
    ShortcutSettings,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Press/release pairs inside this window coalesce into one click, ms.
    pub click_coalesce_ms: u64,
    /// Two clicks inside this window pair into a double-click, ms.
    pub double_click_interval_ms: u64,
    /// Position tolerance for double-click pairing, pixels.
    pub double_click_radius: f64,
    /// Unmodified printable keys within this window merge into one text
    /// run, ms.
    pub text_coalesce_ms: u64,
    /// DPI scale of the capture display, stamped into mouse coordinates.
    pub capture_dpi_scale: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            click_coalesce_ms: 250,
            double_click_interval_ms: 500,
            double_click_radius: 5.0,
            text_coalesce_ms: 1000,
            capture_dpi_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
struct PendingClick {
    button: MouseButton,
    x: i32,
    y: i32,
    down_at: Instant,
}

#[derive(Debug, Clone)]
struct LastClick {
    button: MouseButton,
    x: i32,
    y: i32,
    at: Instant,
    action_index: usize,
}

#[derive(Debug, Clone)]
struct PendingText {
    text: String,
    first_at: Instant,
    last_at: Instant,
}

pub struct CaptureEngine {
    config: CaptureConfig,
    state: CaptureState,
    recording: Option<Recording>,
    /// Monotonic mark of the previous materialized action; the next
    /// action's `delay_before` measures from here.
    last_mark: Option<Instant>,
    pending_click: Option<PendingClick>,
    last_click: Option<LastClick>,
    pending_text: Option<PendingText>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            recording: None,
            last_mark: None,
            pending_click: None,
            last_click: None,
            pending_text: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn start(&mut self, name: &str) -> Result<()> {
        match self.state {
            CaptureState::Idle | CaptureState::Completed | CaptureState::Cancelled => {}
            other => {
                return Err(RecorderError::InvalidState(format!(
                    "cannot start capture from {other:?}"
                )))
            }
        }
        let mut recording = Recording::new(name).map_err(RecorderError::Core)?;
        recording.metadata.recorded_on = hostname();
        recording.metadata.recorded_dpi = Some(self.config.capture_dpi_scale);
        recording.metadata.os_version = Some(std::env::consts::OS.to_string());
        recording.start_recording().map_err(RecorderError::Core)?;

        info!(name, "capture started");
        self.recording = Some(recording);
        self.state = CaptureState::Recording;
        self.last_mark = None;
        self.pending_click = None;
        self.last_click = None;
        self.pending_text = None;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.state != CaptureState::Recording {
            return Err(RecorderError::InvalidState(format!(
                "cannot pause from {:?}",
                self.state
            )));
        }
        self.flush_text()?;
        self.pending_click = None;
        self.recording
            .as_mut()
            .expect("recording present while Recording")
            .pause_recording()
            .map_err(RecorderError::Core)?;
        self.state = CaptureState::Paused;
        info!("capture paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != CaptureState::Paused {
            return Err(RecorderError::InvalidState(format!(
                "cannot resume from {:?}",
                self.state
            )));
        }
        self.recording
            .as_mut()
            .expect("recording present while Paused")
            .resume_recording()
            .map_err(RecorderError::Core)?;
        // Restart the delay mark so paused wall-time is excluded from the
        // next action's delay_before.
        self.last_mark = Some(Instant::now());
        self.state = CaptureState::Recording;
        info!("capture resumed");
        Ok(())
    }

    /// Finish the session: flush pending state, complete the recording
    /// and compute its content hash.
    pub fn stop(&mut self) -> Result<Recording> {
        if !matches!(self.state, CaptureState::Recording | CaptureState::Paused) {
            return Err(RecorderError::InvalidState(format!(
                "cannot stop from {:?}",
                self.state
            )));
        }
        self.flush_text()?;
        let mut recording = self.recording.take().expect("recording present");
        recording.complete_recording().map_err(RecorderError::Core)?;
        let bytes = canonical_bytes(&recording).map_err(RecorderError::Core)?;
        recording.content_hash = crypto::content_hash(&bytes);
        self.state = CaptureState::Completed;
        info!(
            actions = recording.action_count(),
            "capture completed"
        );
        Ok(recording)
    }

    /// Discard the session and everything buffered.
    pub fn cancel(&mut self) -> Result<()> {
        if let Some(mut recording) = self.recording.take() {
            let _ = recording.cancel_recording();
        }
        self.pending_click = None;
        self.pending_text = None;
        self.last_click = None;
        self.state = CaptureState::Cancelled;
        info!("capture cancelled");
        Ok(())
    }

    /// Materialize one filtered event observed at `at`. Events arriving
    /// while paused are dropped.
    pub fn handle(&mut self, event: &CaptureEvent, at: Instant) -> Result<()> {
        if self.state != CaptureState::Recording {
            return Ok(());
        }
        match event {
            CaptureEvent::Chord {
                key,
                vk,
                ctrl,
                alt,
                shift,
                win,
            } => {
                if !ctrl && !alt && !win {
                    if let Some(c) = text_char(key, *shift) {
                        self.append_text(c, at)?;
                        return Ok(());
                    }
                }
                self.flush_text()?;
                let input = KeyInput {
                    key_code: *vk,
                    shift: *shift,
                    ctrl: *ctrl,
                    alt: *alt,
                    win: *win,
                };
                self.push_action(Action::key_press(input), at)?;
            }
            // Pointer trajectory is not replayed; position rides on clicks.
            CaptureEvent::MouseMove { .. } => {}
            CaptureEvent::ButtonDown { button, x, y } => {
                self.flush_text()?;
                self.pending_click = Some(PendingClick {
                    button: *button,
                    x: *x,
                    y: *y,
                    down_at: at,
                });
            }
            CaptureEvent::ButtonUp { button, .. } => {
                let Some(pending) = self.pending_click.take() else {
                    return Ok(());
                };
                if pending.button != *button {
                    return Ok(());
                }
                let held_ms = at.saturating_duration_since(pending.down_at).as_millis() as u64;
                if held_ms > self.config.click_coalesce_ms {
                    debug!(held_ms, "slow press still recorded as a click");
                }
                self.materialize_click(pending)?;
            }
            CaptureEvent::Wheel { delta, x, y } => {
                self.flush_text()?;
                let input = MouseInput::new(
                    MouseButton::Middle,
                    Coordinate::with_dpi(*x, *y, self.config.capture_dpi_scale),
                    false,
                    *delta,
                )
                .map_err(RecorderError::Core)?;
                let action = Action::new(ezrec::ActionKind::Mouse {
                    input,
                    target_window: None,
                    relative_to_window: false,
                });
                self.push_action(action, at)?;
            }
        }
        Ok(())
    }

    fn materialize_click(&mut self, pending: PendingClick) -> Result<()> {
        // A second matching click close in time and space upgrades the
        // previous click action to a double-click.
        if let Some(last) = &self.last_click {
            let gap = pending
                .down_at
                .saturating_duration_since(last.at)
                .as_millis() as u64;
            let dx = (pending.x - last.x) as f64;
            let dy = (pending.y - last.y) as f64;
            let close = (dx * dx + dy * dy).sqrt() <= self.config.double_click_radius;
            if last.button == pending.button && gap <= self.config.double_click_interval_ms && close
            {
                let index = last.action_index;
                let recording = self
                    .recording
                    .as_mut()
                    .expect("recording present while Recording");
                if let Some(action) = recording.actions.get_mut(index) {
                    if let ezrec::ActionKind::Mouse { input, .. } = &mut action.kind {
                        input.double_click = true;
                    }
                }
                self.last_click = None;
                self.last_mark = Some(pending.down_at);
                return Ok(());
            }
        }

        let input = MouseInput::click(
            pending.button,
            Coordinate::with_dpi(pending.x, pending.y, self.config.capture_dpi_scale),
        );
        let action = Action::new(ezrec::ActionKind::Mouse {
            input,
            target_window: None,
            relative_to_window: false,
        });
        let index = self.push_action(action, pending.down_at)?;
        self.last_click = Some(LastClick {
            button: pending.button,
            x: pending.x,
            y: pending.y,
            at: pending.down_at,
            action_index: index,
        });
        Ok(())
    }

    fn append_text(&mut self, c: char, at: Instant) -> Result<()> {
        match &mut self.pending_text {
            Some(pending)
                if at.saturating_duration_since(pending.last_at).as_millis() as u64
                    <= self.config.text_coalesce_ms =>
            {
                pending.text.push(c);
                pending.last_at = at;
                Ok(())
            }
            _ => {
                self.flush_text()?;
                self.pending_text = Some(PendingText {
                    text: c.to_string(),
                    first_at: at,
                    last_at: at,
                });
                Ok(())
            }
        }
    }

    fn flush_text(&mut self) -> Result<()> {
        let Some(pending) = self.pending_text.take() else {
            return Ok(());
        };
        let action = Action::text_input(&pending.text, InputMethod::Direct);
        self.push_action(action, pending.first_at)?;
        // Later delays measure from the end of the text run.
        self.last_mark = Some(pending.last_at);
        Ok(())
    }

    fn push_action(&mut self, mut action: Action, observed_at: Instant) -> Result<usize> {
        action.delay_before = self
            .last_mark
            .map(|mark| observed_at.saturating_duration_since(mark).as_millis() as u64)
            .unwrap_or(0);
        let recording = self
            .recording
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("no active recording".to_string()))?;
        recording.add_action(action).map_err(RecorderError::Core)?;
        self.last_mark = Some(observed_at);
        Ok(recording.action_count() - 1)
    }
}

fn text_char(key: &str, shift: bool) -> Option<char> {
    if key == "space" {
        return Some(' ');
    }
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => {
            Some(if shift { c.to_ascii_uppercase() } else { c })
        }
        _ => None,
    }
}

fn hostname() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default()
}

/// Capture orchestrator: owns the input source, the filter and the engine,
/// runs the consumer thread, and applies the reserved control chords.
pub struct Recorder {
    engine: Arc<Mutex<CaptureEngine>>,
    settings: ShortcutSettings,
    source: Box<dyn InputSource>,
    consumer: Option<thread::JoinHandle<()>>,
    completed: Arc<Mutex<Option<Recording>>>,
    default_name: String,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl Recorder {
    pub fn new(
        default_name: &str,
        settings: ShortcutSettings,
        config: CaptureConfig,
        source: Box<dyn InputSource>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            engine: Arc::new(Mutex::new(CaptureEngine::new(config))),
            settings,
            source,
            consumer: None,
            completed: Arc::new(Mutex::new(None)),
            default_name: default_name.to_string(),
            event_tx,
        }
    }

    /// Live stream of the events surviving the filter, for observers.
    pub fn event_stream(&self) -> impl Stream<Item = CaptureEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Install the hook and start consuming events. Capture itself begins
    /// with [`Recorder::start_capture`] or the start/stop control chord.
    pub fn start(&mut self) -> Result<()> {
        if self.consumer.is_some() {
            return Err(RecorderError::InvalidState(
                "recorder already started".to_string(),
            ));
        }
        let rx = self.source.start()?;
        let engine = Arc::clone(&self.engine);
        let completed = Arc::clone(&self.completed);
        let mut filter = EventFilter::new(self.settings.clone());
        let default_name = self.default_name.clone();
        let event_tx = self.event_tx.clone();

        let consumer = thread::Builder::new()
            .name("ezrec-capture".to_string())
            .spawn(move || {
                while let Ok(raw) = rx.recv() {
                    match filter.process(&raw) {
                        FilterDecision::Forward(event) => {
                            let _ = event_tx.send(event.clone());
                            let mut engine = engine.lock().unwrap();
                            if let Err(e) = engine.handle(&event, raw.monotonic) {
                                warn!("event dropped: {e}");
                            }
                        }
                        FilterDecision::Control(action) => {
                            Self::apply_control(&engine, &completed, &default_name, action);
                        }
                        FilterDecision::Drop => {}
                    }
                }
                debug!("capture consumer stopped");
            })
            .map_err(|e| RecorderError::HookUnavailable(e.to_string()))?;
        self.consumer = Some(consumer);
        Ok(())
    }

    fn apply_control(
        engine: &Arc<Mutex<CaptureEngine>>,
        completed: &Arc<Mutex<Option<Recording>>>,
        default_name: &str,
        action: ControlAction,
    ) {
        let mut engine = engine.lock().unwrap();
        let outcome = match (action, engine.state()) {
            (ControlAction::StartStop, CaptureState::Recording | CaptureState::Paused) => {
                match engine.stop() {
                    Ok(recording) => {
                        *completed.lock().unwrap() = Some(recording);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            (ControlAction::StartStop, _) => engine.start(default_name),
            (ControlAction::PauseResume, CaptureState::Recording) => engine.pause(),
            (ControlAction::PauseResume, CaptureState::Paused) => engine.resume(),
            (ControlAction::PauseResume, _) => Ok(()),
            (ControlAction::EmergencyStop, _) => engine.cancel(),
        };
        if let Err(e) = outcome {
            warn!(?action, "control chord not applied: {e}");
        }
    }

    pub fn state(&self) -> CaptureState {
        self.engine.lock().unwrap().state()
    }

    pub fn start_capture(&self, name: &str) -> Result<()> {
        self.engine.lock().unwrap().start(name)
    }

    pub fn pause_capture(&self) -> Result<()> {
        self.engine.lock().unwrap().pause()
    }

    pub fn resume_capture(&self) -> Result<()> {
        self.engine.lock().unwrap().resume()
    }

    pub fn stop_capture(&self) -> Result<Recording> {
        self.engine.lock().unwrap().stop()
    }

    pub fn cancel_capture(&self) -> Result<()> {
        self.engine.lock().unwrap().cancel()
    }

    /// A recording completed through the start/stop control chord, if any.
    pub fn take_completed(&self) -> Option<Recording> {
        self.completed.lock().unwrap().take()
    }

    /// Stop the hook; the consumer drains and exits with the channel.
    pub fn shutdown(&mut self) {
        self.source.stop();
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
    }
}
