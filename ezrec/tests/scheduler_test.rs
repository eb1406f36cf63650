//! Scheduler behavior with a manual clock: liveness and safety of
//! dispatch, startup triggers, event notifications and execution timeouts.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ezrec::testkit::{ManualClock, MockSink};
use ezrec::{
    Action, Clock, Coordinate, MouseButton, Recording, Schedule, ScheduleStatus, Scheduler,
    SchedulerConfig, Storage, StorageConfig, TimeOfDay, TriggerCondition,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn ts(s: &str) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap(),
    )
}

fn stored_recording(storage: &Storage) -> Recording {
    let mut recording = Recording::new("scheduled work").unwrap();
    recording.start_recording().unwrap();
    for _ in 0..3 {
        recording.add_action(Action::wait(100)).unwrap();
    }
    recording
        .add_action(Action::mouse_click(MouseButton::Left, Coordinate::new(5, 5)))
        .unwrap();
    recording.complete_recording().unwrap();
    recording.playback_settings.speed_multiplier = 2.0;
    recording.playback_settings.restore_window_positions = false;
    recording.playback_settings.ensure_foreground = false;
    let mut stored = recording;
    storage.save_recording(&mut stored).unwrap();
    stored
}

struct Fixture {
    storage: Storage,
    clock: Arc<ManualClock>,
    sink: Arc<MockSink>,
    scheduler: Arc<Scheduler>,
    _dir: tempfile::TempDir,
}

fn fixture(start: DateTime<Utc>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(StorageConfig::new(dir.path())).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let sink = Arc::new(MockSink::new());
    let scheduler = Scheduler::new(
        storage.clone(),
        sink.clone() as Arc<_>,
        clock.clone() as Arc<_>,
        SchedulerConfig::default(),
    );
    Fixture {
        storage,
        clock,
        sink,
        scheduler,
        _dir: dir,
    }
}

fn wait_until_idle(scheduler: &Scheduler, schedule_id: uuid::Uuid) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        scheduler.tick().unwrap();
        if scheduler.running_count(schedule_id) == 0 {
            return;
        }
        assert!(Instant::now() < deadline, "execution did not finish");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn scheduled_trigger_dispatches_exactly_once_in_its_window() {
    let fx = fixture(ts("2026-03-02 08:59:50"));
    let recording = stored_recording(&fx.storage);

    let mut schedule = Schedule::new(
        "daily 9am",
        recording.recording_id,
        TriggerCondition::Scheduled {
            time: TimeOfDay::new(9, 0, 0).unwrap(),
            weekdays: BTreeSet::new(),
            repeat: None,
        },
    );
    schedule.execution_timeout_ms = 10_000;
    schedule.activate(fx.clock.now_wall()).unwrap();
    fx.storage.save_schedule(&schedule).unwrap();

    // Before the slot: nothing fires.
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 0);

    // Inside [T, T+1s]: exactly one dispatch, even across repeated ticks.
    fx.clock.set_wall(ts("2026-03-02 09:00:00"));
    fx.scheduler.tick().unwrap();
    fx.scheduler.tick().unwrap();
    wait_until_idle(&fx.scheduler, schedule.schedule_id);

    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.total_executions, 1);
    assert_eq!(loaded.successful_executions, 1);
    assert_eq!(loaded.status, ScheduleStatus::Active);
    // The next slot is tomorrow at 09:00.
    assert_eq!(loaded.next_execution, Some(ts("2026-03-03 09:00:00")));
    assert_eq!(fx.storage.executions_for(schedule.schedule_id).unwrap().len(), 1);

    // A recording-side summary is kept too.
    let replayed = fx.storage.load_recording(recording.recording_id).unwrap();
    assert_eq!(replayed.total_executions, 1);
}

#[test]
fn disabled_schedule_never_dispatches() {
    let fx = fixture(ts("2026-03-02 08:00:00"));
    let recording = stored_recording(&fx.storage);

    let mut schedule = Schedule::new(
        "disabled",
        recording.recording_id,
        TriggerCondition::Scheduled {
            time: TimeOfDay::new(9, 0, 0).unwrap(),
            weekdays: BTreeSet::new(),
            repeat: None,
        },
    );
    schedule.activate(fx.clock.now_wall()).unwrap();
    schedule.enabled = false;
    fx.storage.save_schedule(&schedule).unwrap();

    fx.clock.set_wall(ts("2026-03-02 09:00:30"));
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 0);
    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.total_executions, 0);
}

#[test]
fn parallel_limit_is_never_exceeded() {
    let fx = fixture(ts("2026-03-02 08:00:00"));
    let recording = stored_recording(&fx.storage);
    // Block each action long enough for overlapping dispatch attempts.
    fx.sink.set_execute_delay(Duration::from_millis(150));

    let mut schedule = Schedule::new(
        "manual burst",
        recording.recording_id,
        TriggerCondition::Manual,
    );
    schedule.max_parallel_executions = 1;
    schedule.activate(fx.clock.now_wall()).unwrap();
    fx.storage.save_schedule(&schedule).unwrap();

    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 1);

    // Further notifications while saturated are dropped, not queued.
    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 1);

    wait_until_idle(&fx.scheduler, schedule.schedule_id);
    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.total_executions, 1);
}

#[test]
fn startup_trigger_fires_once_after_delay() {
    let fx = fixture(ts("2026-03-02 12:00:00"));
    let recording = stored_recording(&fx.storage);

    let mut schedule = Schedule::new(
        "on boot",
        recording.recording_id,
        TriggerCondition::Startup { delay_ms: 5000 },
    );
    schedule.activate(fx.clock.now_wall()).unwrap();
    fx.storage.save_schedule(&schedule).unwrap();

    // Before the delay elapses.
    fx.clock.set_wall(ts("2026-03-02 12:00:03"));
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 0);

    fx.clock.set_wall(ts("2026-03-02 12:00:06"));
    fx.scheduler.tick().unwrap();
    wait_until_idle(&fx.scheduler, schedule.schedule_id);

    // Never again this process.
    fx.clock.set_wall(ts("2026-03-02 13:00:00"));
    fx.scheduler.tick().unwrap();
    wait_until_idle(&fx.scheduler, schedule.schedule_id);

    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.total_executions, 1);
}

#[test]
fn timed_out_execution_is_failed_with_timeout() {
    let fx = fixture(ts("2026-03-02 08:00:00"));
    let recording = stored_recording(&fx.storage);
    fx.sink.set_execute_delay(Duration::from_millis(400));

    let mut schedule = Schedule::new(
        "slowpoke",
        recording.recording_id,
        TriggerCondition::Manual,
    );
    schedule.execution_timeout_ms = 50;
    schedule.activate(fx.clock.now_wall()).unwrap();
    fx.storage.save_schedule(&schedule).unwrap();

    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.tick().unwrap();
    assert_eq!(fx.scheduler.running_count(schedule.schedule_id), 1);

    // Past the deadline the scheduler cancels the replay token.
    fx.clock.advance(ChronoDuration::milliseconds(100));
    fx.scheduler.tick().unwrap();
    wait_until_idle(&fx.scheduler, schedule.schedule_id);

    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.status, ScheduleStatus::Failed);
    assert_eq!(loaded.successful_executions, 0);
    let history = fx.storage.executions_for(schedule.schedule_id).unwrap();
    assert_eq!(history.len(), 1);
    let error = history[0].error_message.clone().unwrap_or_default();
    assert!(error.contains("exceeded"), "unexpected error: {error}");
}

#[test]
fn failed_recording_load_records_a_failed_execution() {
    let fx = fixture(ts("2026-03-02 08:00:00"));

    // Schedule pointing at a recording that was never stored.
    let mut schedule = Schedule::new(
        "orphan",
        uuid::Uuid::new_v4(),
        TriggerCondition::Manual,
    );
    schedule.activate(fx.clock.now_wall()).unwrap();
    fx.storage.save_schedule(&schedule).unwrap();

    fx.scheduler.notify(schedule.schedule_id);
    fx.scheduler.tick().unwrap();

    let loaded = fx.storage.load_schedule(schedule.schedule_id).unwrap();
    assert_eq!(loaded.total_executions, 1);
    assert_eq!(loaded.successful_executions, 0);
    assert_eq!(loaded.status, ScheduleStatus::Failed);
}
