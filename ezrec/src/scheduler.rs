//! Trigger evaluation and execution dispatch.
//!
//! One cooperative loop ticks at a fixed cadence, evaluates polled
//! triggers against the wall clock, drains event-trigger notifications
//! (hotkey, file watcher, idle), dispatches executions up to each
//! schedule's parallelism bound, enforces execution timeouts, and reaps
//! finished workers. Replay runs on one thread per execution.

use crate::clock::{CancelToken, Clock};
use crate::errors::{Result, RpaError};
use crate::replay::{Player, PlaybackOutcome};
use crate::schedule::{Schedule, TriggerCondition};
use crate::sink::InputSink;
use crate::storage::Storage;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cadence of the evaluation loop.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// In-flight execution bookkeeping held by the scheduler.
struct RunningExecution {
    execution_id: Uuid,
    cancel: CancelToken,
    deadline: DateTime<Utc>,
    done: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

struct SchedulerState {
    /// In-flight executions per schedule.
    running: HashMap<Uuid, Vec<RunningExecution>>,
    /// Event-trigger notifications pending dispatch.
    notified: Vec<Uuid>,
    /// Startup triggers already fired this process.
    startup_fired: HashSet<Uuid>,
}

pub struct Scheduler {
    storage: Storage,
    sink: Arc<dyn InputSink>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    stop: CancelToken,
    state: Mutex<SchedulerState>,
    /// Serializes load-modify-save cycles on schedule aggregates between
    /// the tick thread and finishing workers.
    schedule_lock: Arc<Mutex<()>>,
    process_start: DateTime<Utc>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Scheduler {
    pub fn new(
        storage: Storage,
        sink: Arc<dyn InputSink>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let process_start = clock.now_wall();
        Arc::new(Self {
            storage,
            sink,
            clock,
            config,
            stop: CancelToken::new(),
            state: Mutex::new(SchedulerState {
                running: HashMap::new(),
                notified: Vec::new(),
                startup_fired: HashSet::new(),
            }),
            schedule_lock: Arc::new(Mutex::new(())),
            process_start,
            watcher: Mutex::new(None),
        })
    }

    /// Spawn the evaluation loop on its own thread.
    pub fn start(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        thread::Builder::new()
            .name("ezrec-scheduler".to_string())
            .spawn(move || {
                info!("scheduler loop started");
                while !scheduler.stop.is_cancelled() {
                    if let Err(e) = scheduler.tick() {
                        error!("scheduler tick failed: {e}");
                    }
                    scheduler
                        .clock
                        .sleep(scheduler.config.tick_interval, &scheduler.stop);
                }
                info!("scheduler loop stopped");
            })
            .expect("spawn scheduler thread")
    }

    /// Stop the loop and cancel every in-flight execution.
    pub fn shutdown(&self) {
        self.stop.cancel();
        let mut state = self.state.lock().unwrap();
        for executions in state.running.values() {
            for running in executions {
                running.cancel.cancel();
            }
        }
        for executions in state.running.values_mut() {
            for running in executions.iter_mut() {
                if let Some(handle) = running.handle.take() {
                    let _ = handle.join();
                }
            }
        }
        state.running.clear();
    }

    /// Event-trigger entry point: hotkey, file-watcher and idle observers
    /// (and manual runs) land here.
    pub fn notify(&self, schedule_id: Uuid) {
        debug!(%schedule_id, "trigger notification");
        self.state.lock().unwrap().notified.push(schedule_id);
    }

    pub fn running_count(&self, schedule_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .running
            .get(&schedule_id)
            .map_or(0, |v| v.len())
    }

    /// One evaluation pass. The loop calls this every tick; tests call it
    /// directly.
    pub fn tick(&self) -> Result<()> {
        let now = self.clock.now_wall();
        self.reap_finished();
        self.enforce_timeouts(now);

        let notified: Vec<Uuid> = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.notified)
        };
        for schedule_id in notified {
            match self.storage.load_schedule(schedule_id) {
                Ok(schedule) => self.try_dispatch(schedule, now),
                Err(e) => warn!(%schedule_id, "notified schedule not loadable: {e}"),
            }
        }

        for schedule in self.storage.active_schedules()? {
            match &schedule.trigger {
                TriggerCondition::Scheduled { .. } => {
                    let due = schedule
                        .next_execution
                        .or_else(|| {
                            schedule.trigger.next_fire_after(
                                now,
                                schedule.last_execution,
                                schedule.total_executions,
                            )
                        })
                        .is_some_and(|at| at <= now);
                    if due {
                        self.try_dispatch(schedule, now);
                    }
                }
                TriggerCondition::Startup { delay_ms } => {
                    let fire_at =
                        self.process_start + ChronoDuration::milliseconds(*delay_ms as i64);
                    let already_fired = self
                        .state
                        .lock()
                        .unwrap()
                        .startup_fired
                        .contains(&schedule.schedule_id);
                    if !already_fired && now >= fire_at {
                        self.state
                            .lock()
                            .unwrap()
                            .startup_fired
                            .insert(schedule.schedule_id);
                        self.try_dispatch(schedule, now);
                    }
                }
                // Event-based triggers arrive through notify().
                _ => {}
            }
        }
        Ok(())
    }

    /// Watch the paths of every file-watcher schedule present at startup;
    /// filesystem events notify the owning schedule.
    pub fn start_file_watchers(self: &Arc<Self>) -> Result<()> {
        let mut path_map: HashMap<PathBuf, Uuid> = HashMap::new();
        for schedule in self.storage.list_schedules()? {
            if let TriggerCondition::FileWatcher { path } = &schedule.trigger {
                path_map.insert(PathBuf::from(path), schedule.schedule_id);
            }
        }
        if path_map.is_empty() {
            return Ok(());
        }

        let scheduler = Arc::clone(self);
        let lookup = path_map.clone();
        let mut watcher = notify::recommended_watcher(
            move |event: std::result::Result<notify::Event, notify::Error>| match event {
                Ok(event) => {
                    for path in &event.paths {
                        for (watched, schedule_id) in &lookup {
                            if path.starts_with(watched) || path == watched {
                                scheduler.notify(*schedule_id);
                            }
                        }
                    }
                }
                Err(e) => warn!("file watcher error: {e}"),
            },
        )
        .map_err(|e| RpaError::Storage(format!("file watcher: {e}")))?;

        for path in path_map.keys() {
            // Watch the parent so events fire for files that do not exist yet.
            let target: &Path = if path.exists() {
                path
            } else {
                path.parent().unwrap_or(path)
            };
            if let Err(e) = watcher.watch(target, RecursiveMode::NonRecursive) {
                warn!(path = %path.display(), "cannot watch path: {e}");
            }
        }
        *self.watcher.lock().unwrap() = Some(watcher);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn try_dispatch(&self, schedule: Schedule, now: DateTime<Utc>) {
        if !schedule.enabled {
            return;
        }
        if self.running_count(schedule.schedule_id) >= schedule.max_parallel_executions as usize {
            debug!(schedule = %schedule.name, "parallel limit reached, skipping dispatch");
            return;
        }
        if let Err(e) = self.dispatch(schedule, now) {
            error!("dispatch failed: {e}");
        }
    }

    fn dispatch(&self, mut schedule: Schedule, now: DateTime<Utc>) -> Result<()> {
        let recording = match self.storage.load_recording(schedule.recording_id) {
            Ok(recording) => recording,
            Err(e) => {
                // A schedule whose recording cannot be loaded records a
                // failed execution and stays put for user intervention;
                // decryption failures never disable the schedule.
                warn!(schedule = %schedule.name, "recording unavailable: {e}");
                let _guard = self.schedule_lock.lock().unwrap();
                let mut result = schedule.start_execution(now, 0)?;
                self.storage.insert_execution(&result)?;
                result.mark_completed(now, false, Some(e.to_string()), 0)?;
                schedule.complete_execution(
                    result.execution_id,
                    now,
                    false,
                    Some(e.to_string()),
                    0,
                    false,
                )?;
                self.storage.complete_execution(&result)?;
                self.storage.save_schedule(&schedule)?;
                return Err(e);
            }
        };

        let execution = {
            let _guard = self.schedule_lock.lock().unwrap();
            let execution = schedule.start_execution(now, recording.actions.len() as u32)?;
            // Advance past the slot that just fired so the next tick does
            // not dispatch it again while this run is in flight.
            schedule.recompute_next_execution(now);
            self.storage.insert_execution(&execution)?;
            self.storage.save_schedule(&schedule)?;
            execution
        };

        info!(
            schedule = %schedule.name,
            execution = %execution.execution_id,
            "dispatching execution"
        );

        let cancel = CancelToken::new();
        let done = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = now + ChronoDuration::milliseconds(schedule.execution_timeout_ms as i64);

        let worker = {
            let storage = self.storage.clone();
            let sink = Arc::clone(&self.sink);
            let clock = Arc::clone(&self.clock);
            let schedule_lock = Arc::clone(&self.schedule_lock);
            let cancel = cancel.clone();
            let done = Arc::clone(&done);
            let timed_out = Arc::clone(&timed_out);
            let schedule_id = schedule.schedule_id;
            let execution_id = execution.execution_id;
            let timeout_ms = schedule.execution_timeout_ms;

            thread::Builder::new()
                .name(format!("ezrec-exec-{execution_id}"))
                .spawn(move || {
                    let player = Player::new(sink, Arc::clone(&clock));
                    let run = player.run(&recording, None, &cancel);

                    let (success, cancelled, error, actions_executed) = match run {
                        Ok(result) => match result.outcome {
                            PlaybackOutcome::Completed => {
                                (true, false, None, result.actions_executed)
                            }
                            PlaybackOutcome::Failed { index, error } => (
                                false,
                                false,
                                Some(format!("action {index}: {error}")),
                                result.actions_executed,
                            ),
                            PlaybackOutcome::Cancelled { index } => {
                                if timed_out.load(Ordering::SeqCst) {
                                    (
                                        false,
                                        false,
                                        Some(
                                            RpaError::Timeout(format!(
                                                "execution exceeded {timeout_ms}ms"
                                            ))
                                            .to_string(),
                                        ),
                                        result.actions_executed,
                                    )
                                } else {
                                    (
                                        false,
                                        true,
                                        Some(format!("cancelled before action {index}")),
                                        result.actions_executed,
                                    )
                                }
                            }
                        },
                        Err(e) => (false, false, Some(e.to_string()), 0),
                    };

                    let end = clock.now_wall();
                    let _guard = schedule_lock.lock().unwrap();
                    let finish = (|| -> Result<()> {
                        let mut schedule = storage.load_schedule(schedule_id)?;
                        let finished = schedule.complete_execution(
                            execution_id,
                            end,
                            success,
                            error.clone(),
                            actions_executed,
                            cancelled,
                        )?;
                        storage.complete_execution(&finished)?;
                        storage.save_schedule(&schedule)?;

                        let mut recording = storage.load_recording(schedule.recording_id)?;
                        recording.mark_execution(
                            success,
                            finished.duration_ms().unwrap_or_default(),
                        );
                        storage.save_recording(&mut recording)?;
                        Ok(())
                    })();
                    if let Err(e) = finish {
                        error!(%execution_id, "could not record execution outcome: {e}");
                    }
                    done.store(true, Ordering::SeqCst);
                })
                .expect("spawn execution thread")
        };

        self.state
            .lock()
            .unwrap()
            .running
            .entry(schedule.schedule_id)
            .or_default()
            .push(RunningExecution {
                execution_id: execution.execution_id,
                cancel,
                deadline,
                done,
                timed_out,
                handle: Some(worker),
            });
        Ok(())
    }

    fn reap_finished(&self) {
        let mut state = self.state.lock().unwrap();
        for executions in state.running.values_mut() {
            executions.retain_mut(|running| {
                if running.done.load(Ordering::SeqCst) {
                    if let Some(handle) = running.handle.take() {
                        let _ = handle.join();
                    }
                    debug!(execution = %running.execution_id, "reaped finished execution");
                    false
                } else {
                    true
                }
            });
        }
        state.running.retain(|_, v| !v.is_empty());
    }

    fn enforce_timeouts(&self, now: DateTime<Utc>) {
        let state = self.state.lock().unwrap();
        for executions in state.running.values() {
            for running in executions {
                if now > running.deadline && !running.done.load(Ordering::SeqCst) {
                    warn!(execution = %running.execution_id, "execution timed out, cancelling");
                    running.timed_out.store(true, Ordering::SeqCst);
                    running.cancel.cancel();
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
