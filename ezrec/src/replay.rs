//! Timeline replay: re-synthesizes a recording's actions through an
//! [`InputSink`] with per-action delays, retry and stop-on-error policy,
//! speed scaling and cooperative cancellation.
//!
//! The engine holds a read-only snapshot for the duration of one run;
//! progress streams out over a broadcast channel.

use crate::action::{Action, ActionKind};
use crate::clock::{CancelToken, Clock, SleepOutcome};
use crate::errors::{Result, RpaError};
use crate::recording::{PlaybackSettings, Recording};
use crate::sink::InputSink;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pause before the single retry that follows a failed foreground
/// activation.
const FOREGROUND_RETRY_PAUSE: Duration = Duration::from_millis(50);

/// Progress updates emitted during one run.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started {
        recording_id: Uuid,
        total_actions: usize,
    },
    ActionBegin {
        index: usize,
    },
    ActionEnd {
        index: usize,
        error: Option<RpaError>,
    },
    Finished {
        outcome: PlaybackOutcome,
    },
}

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Completed,
    Failed { index: usize, error: RpaError },
    Cancelled { index: usize },
}

impl PlaybackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PlaybackOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlaybackOutcome::Cancelled { .. })
    }
}

/// Terminal report of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackResult {
    pub outcome: PlaybackOutcome,
    pub actions_executed: u32,
    pub total_actions: u32,
    pub duration_ms: u64,
}

/// The replay engine. One `run` executes one recording snapshot; engines
/// are cheap and the scheduler spawns one per execution.
pub struct Player {
    sink: Arc<dyn InputSink>,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<PlaybackEvent>,
}

impl Player {
    pub fn new(sink: Arc<dyn InputSink>, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            sink,
            clock,
            event_tx,
        }
    }

    /// Subscribe to progress updates for runs on this player.
    pub fn event_stream(&self) -> impl Stream<Item = PlaybackEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Execute the recording. `overrides` replaces the recording's own
    /// playback settings for this run only.
    pub fn run(
        &self,
        recording: &Recording,
        overrides: Option<PlaybackSettings>,
        token: &CancelToken,
    ) -> Result<PlaybackResult> {
        if !recording.can_be_executed() {
            return Err(RpaError::Validation(format!(
                "recording '{}' is not executable",
                recording.name
            )));
        }
        let settings = overrides.unwrap_or_else(|| recording.playback_settings.clone());
        settings.validate().into_result()?;
        let speed = settings.speed_multiplier;

        info!(
            recording = %recording.name,
            actions = recording.actions.len(),
            speed,
            "replay started"
        );

        // Record the pre-replay foreground window for restoration on finish.
        let restore_window = if settings.restore_window_positions {
            self.sink.foreground_window().unwrap_or(None)
        } else {
            None
        };

        let started = self.clock.now_mono();
        self.emit(PlaybackEvent::Started {
            recording_id: recording.recording_id,
            total_actions: recording.actions.len(),
        });

        let mut executed: u32 = 0;
        let mut outcome = PlaybackOutcome::Completed;

        'timeline: for (index, action) in recording.actions.iter().enumerate() {
            if token.is_cancelled() {
                outcome = PlaybackOutcome::Cancelled { index };
                break;
            }

            if self.scaled_sleep(action.delay_before, speed, token) == SleepOutcome::Cancelled {
                outcome = PlaybackOutcome::Cancelled { index };
                break;
            }

            self.emit(PlaybackEvent::ActionBegin { index });

            // Wait actions are pure sleeps; speed scaling applies, retries
            // and the sink do not.
            if let ActionKind::Wait { duration_ms } = &action.kind {
                if self.scaled_sleep(*duration_ms, speed, token) == SleepOutcome::Cancelled {
                    outcome = PlaybackOutcome::Cancelled { index };
                    break;
                }
                executed += 1;
                self.emit(PlaybackEvent::ActionEnd { index, error: None });
                if self.scaled_sleep(action.delay_after, speed, token) == SleepOutcome::Cancelled {
                    outcome = PlaybackOutcome::Cancelled { index: index + 1 };
                    break;
                }
                continue;
            }

            if settings.ensure_foreground {
                self.bring_to_foreground(action, token);
            }

            let attempts = action.retry_count.max(settings.max_retry_attempts).max(1);
            let mut last_error: Option<RpaError> = None;
            for attempt in 1..=attempts {
                match self.execute_bounded(action) {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        debug!(index, attempt, error = %e, "action attempt failed");
                        last_error = Some(e);
                    }
                }
                if token.is_cancelled() {
                    break;
                }
            }

            match last_error {
                None => {
                    executed += 1;
                    self.emit(PlaybackEvent::ActionEnd { index, error: None });
                }
                Some(error) => {
                    self.emit(PlaybackEvent::ActionEnd {
                        index,
                        error: Some(error.clone()),
                    });
                    if action.continue_on_error || !settings.stop_on_error {
                        warn!(index, error = %error, "continuing past failed action");
                    } else {
                        outcome = PlaybackOutcome::Failed { index, error };
                        break 'timeline;
                    }
                }
            }

            if self.scaled_sleep(action.delay_after, speed, token) == SleepOutcome::Cancelled {
                outcome = PlaybackOutcome::Cancelled { index: index + 1 };
                break;
            }
        }

        if let Some(handle) = restore_window {
            if let Err(e) = self.sink.activate_window(handle) {
                debug!("could not restore foreground window: {e}");
            }
        }

        let duration_ms = self
            .clock
            .now_mono()
            .duration_since(started)
            .as_millis() as u64;

        self.emit(PlaybackEvent::Finished {
            outcome: outcome.clone(),
        });
        info!(?outcome, executed, duration_ms, "replay finished");

        Ok(PlaybackResult {
            outcome,
            actions_executed: executed,
            total_actions: recording.actions.len() as u32,
            duration_ms,
        })
    }

    /// Activate the action's target window before synthesizing into it,
    /// retrying once after a short pause when the window is not there yet.
    fn bring_to_foreground(&self, action: &Action, token: &CancelToken) {
        let Some(target) = action.kind.window_target() else {
            return;
        };
        let activate = || -> Result<()> {
            let handle = self.sink.find_window(target)?;
            self.sink.activate_window(handle)
        };
        match activate() {
            Err(RpaError::WindowNotFound(_)) => {
                let _ = self.clock.sleep(FOREGROUND_RETRY_PAUSE, token);
                if let Err(e) = activate() {
                    debug!("foreground activation retry failed: {e}");
                }
            }
            Err(e) => debug!("foreground activation failed: {e}"),
            Ok(()) => {}
        }
    }

    /// One synthesis attempt, bounded by the action's timeout. The
    /// in-flight OS call is never interrupted; on overrun the attempt is
    /// reported as timed out and its thread left to finish.
    fn execute_bounded(&self, action: &Action) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::clone(&self.sink);
        let action = action.clone();
        let timeout = Duration::from_millis(action.timeout);
        thread::spawn(move || {
            let _ = tx.send(sink.execute(&action));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(RpaError::Timeout(format!(
                "action synthesis exceeded {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Sleep `ms / speed`, interruptible.
    fn scaled_sleep(&self, ms: u64, speed: f64, token: &CancelToken) -> SleepOutcome {
        if ms == 0 {
            return if token.is_cancelled() {
                SleepOutcome::Cancelled
            } else {
                SleepOutcome::Elapsed
            };
        }
        let scaled = Duration::from_micros(((ms * 1000) as f64 / speed) as u64);
        self.clock.sleep(scaled, token)
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.event_tx.send(event);
    }
}
