//! Input sources: the OS hook and a channel-backed test double.
//!
//! A source delivers an uninterpreted stream of [`RawEvent`]s over a
//! bounded channel until stopped. It never filters beyond mouse-move rate
//! coalescing; interpretation belongs to the filter.

use crate::error::{RecorderError, Result};
use crate::events::{RawEvent, RawEventKind};
use ezrec::MouseButton;
use rdev::{Button, EventType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Upper bound on forwarded mouse-move events.
pub const MOUSE_MOVE_MAX_HZ: u32 = 120;

/// Bounded channel capacity between the hook and the consumer.
pub const CHANNEL_CAPACITY: usize = 1024;

pub trait InputSource: Send {
    /// Install the hook and return the event stream. The stream ends
    /// shortly after `stop`, or immediately if the hook cannot be
    /// installed.
    fn start(&mut self) -> Result<Receiver<RawEvent>>;

    fn stop(&mut self);
}

/// The global hook source. Runs the OS listener on its own thread and
/// forwards into a bounded channel; events past a full channel are dropped
/// rather than blocking the hook. Stopping drops the sender, so the
/// stream ends at the consumer's next receive even though the OS hook
/// itself lives until process exit.
pub struct RdevSource {
    stop: Arc<AtomicBool>,
    tx_slot: Arc<Mutex<Option<SyncSender<RawEvent>>>>,
    started: bool,
}

impl Default for RdevSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RdevSource {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            tx_slot: Arc::new(Mutex::new(None)),
            started: false,
        }
    }
}

impl InputSource for RdevSource {
    fn start(&mut self) -> Result<Receiver<RawEvent>> {
        if self.started {
            return Err(RecorderError::InvalidState(
                "source already started".to_string(),
            ));
        }
        self.started = true;
        self.stop.store(false, Ordering::SeqCst);

        let (tx, rx) = sync_channel::<RawEvent>(CHANNEL_CAPACITY);
        *self.tx_slot.lock().unwrap() = Some(tx);
        let tx_slot = Arc::clone(&self.tx_slot);
        let tx_slot_on_error = Arc::clone(&self.tx_slot);
        let stop = Arc::clone(&self.stop);

        thread::Builder::new()
            .name("ezrec-input-hook".to_string())
            .spawn(move || {
                let min_move_gap = Duration::from_micros(1_000_000 / MOUSE_MOVE_MAX_HZ as u64);
                let mut last_move = Instant::now() - min_move_gap;
                let mut last_pos = (0i32, 0i32);
                let result = rdev::listen(move |event: rdev::Event| {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let now = Instant::now();
                    let kind = match event.event_type {
                        EventType::KeyPress(key) => Some(RawEventKind::KeyDown {
                            name: format!("{key:?}"),
                        }),
                        EventType::KeyRelease(key) => Some(RawEventKind::KeyUp {
                            name: format!("{key:?}"),
                        }),
                        EventType::MouseMove { x, y } => {
                            // Position is tracked even for coalesced moves
                            // so button events carry the true location.
                            last_pos = (x as i32, y as i32);
                            if now.duration_since(last_move) < min_move_gap {
                                None
                            } else {
                                last_move = now;
                                Some(RawEventKind::MouseMove {
                                    x: last_pos.0,
                                    y: last_pos.1,
                                })
                            }
                        }
                        EventType::ButtonPress(button) => {
                            mouse_button(button).map(|button| RawEventKind::ButtonDown {
                                button,
                                x: last_pos.0,
                                y: last_pos.1,
                            })
                        }
                        EventType::ButtonRelease(button) => {
                            mouse_button(button).map(|button| RawEventKind::ButtonUp {
                                button,
                                x: last_pos.0,
                                y: last_pos.1,
                            })
                        }
                        EventType::Wheel { delta_y, .. } => Some(RawEventKind::Wheel {
                            delta: delta_y as i32,
                            x: last_pos.0,
                            y: last_pos.1,
                        }),
                    };
                    if let Some(kind) = kind {
                        // try_send: a saturated consumer loses events, the
                        // hook thread never blocks the OS queue.
                        if let Some(tx) = tx_slot.lock().unwrap().as_ref() {
                            let _ = tx.try_send(RawEvent::at(kind, now));
                        }
                    }
                });
                if let Err(e) = result {
                    warn!("input hook unavailable: {e:?}");
                    // Drop the sender so the consumer observes a closed
                    // channel instead of a silent stream.
                    *tx_slot_on_error.lock().unwrap() = None;
                }
            })
            .map_err(|e| RecorderError::HookUnavailable(e.to_string()))?;

        info!("input hook started");
        Ok(rx)
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the sender ends the stream for the consumer.
        *self.tx_slot.lock().unwrap() = None;
        self.started = false;
        info!("input hook stopped");
    }
}

fn mouse_button(button: Button) -> Option<MouseButton> {
    match button {
        Button::Left => Some(MouseButton::Left),
        Button::Right => Some(MouseButton::Right),
        Button::Middle => Some(MouseButton::Middle),
        Button::Unknown(4) => Some(MouseButton::X1),
        Button::Unknown(5) => Some(MouseButton::X2),
        Button::Unknown(_) => None,
    }
}

/// Test source: hands out a receiver fed by the caller.
pub struct ChannelSource {
    rx: Option<Receiver<RawEvent>>,
    tx: Option<SyncSender<RawEvent>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        Self {
            rx: Some(rx),
            tx: Some(tx),
        }
    }

    /// Sender side for the test to feed events through.
    pub fn sender(&self) -> SyncSender<RawEvent> {
        self.tx.as_ref().expect("source not stopped").clone()
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for ChannelSource {
    fn start(&mut self) -> Result<Receiver<RawEvent>> {
        self.rx
            .take()
            .ok_or_else(|| RecorderError::InvalidState("source already started".to_string()))
    }

    fn stop(&mut self) {
        // Ends the stream once every caller-held sender clone is gone.
        self.tx = None;
    }
}
