//! Replay engine behavior against a scripted sink: ordering, retry and
//! stop-on-error policy, speed scaling, foreground handling and
//! cancellation promptness.

use ezrec::testkit::MockSink;
use ezrec::{
    Action, ActionKind, CancelToken, Coordinate, InputMethod, MouseButton, PlaybackOutcome,
    PlaybackSettings, Player, Recording, RpaError, SystemClock, WindowTarget,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn completed_recording(actions: Vec<Action>) -> Recording {
    let mut recording = Recording::new("replay test").unwrap();
    recording.start_recording().unwrap();
    for action in actions {
        recording.add_action(action).unwrap();
    }
    recording.complete_recording().unwrap();
    recording
}

fn player_with(sink: &Arc<MockSink>) -> Player {
    Player::new(sink.clone() as Arc<_>, Arc::new(SystemClock))
}

fn fast_settings() -> PlaybackSettings {
    PlaybackSettings {
        restore_window_positions: false,
        ensure_foreground: false,
        ..Default::default()
    }
}

#[test]
fn actions_replay_in_capture_order() {
    let sink = Arc::new(MockSink::new());
    let recording = completed_recording(vec![
        Action::text_input("hello", InputMethod::Direct),
        Action::mouse_click(MouseButton::Left, Coordinate::new(100, 200)),
        Action::wait(5),
    ]);
    let player = player_with(&sink);

    let result = player
        .run(&recording, Some(fast_settings()), &CancelToken::new())
        .unwrap();

    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    assert_eq!(result.actions_executed, 3);
    assert_eq!(result.total_actions, 3);
    assert_eq!(sink.typed_texts(), vec!["hello".to_string()]);

    let executed = sink.executed_actions();
    // Wait actions never reach the sink.
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].sequence_number, 0);
    assert_eq!(executed[1].sequence_number, 1);
}

#[test]
fn non_executable_recording_is_rejected() {
    let sink = Arc::new(MockSink::new());
    let player = player_with(&sink);

    let mut editing = Recording::new("editing").unwrap();
    editing.start_recording().unwrap();
    editing.add_action(Action::wait(1)).unwrap();
    assert!(matches!(
        player.run(&editing, None, &CancelToken::new()),
        Err(RpaError::Validation(_))
    ));
}

#[test]
fn retries_then_fails_with_stop_on_error() {
    let sink = Arc::new(MockSink::new());
    let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(1, 1));
    action.retry_count = 3;
    let failing_id = action.action_id;
    sink.fail_action(
        failing_id,
        RpaError::WindowNotFound("target".to_string()),
        u32::MAX,
    );

    let recording = completed_recording(vec![action, Action::wait(1)]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.max_retry_attempts = 0;

    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();

    match &result.outcome {
        PlaybackOutcome::Failed { index, error } => {
            assert_eq!(*index, 0);
            assert!(matches!(error, RpaError::WindowNotFound(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(sink.attempt_count(failing_id), 3);
    assert_eq!(result.actions_executed, 0);
}

#[test]
fn continue_on_error_finishes_the_timeline() {
    let sink = Arc::new(MockSink::new());
    let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(1, 1));
    action.retry_count = 3;
    action.continue_on_error = true;
    sink.fail_action(
        action.action_id,
        RpaError::WindowNotFound("target".to_string()),
        u32::MAX,
    );

    let trailing = Action::text_input("after", InputMethod::Direct);
    let recording = completed_recording(vec![action, trailing]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.max_retry_attempts = 0;

    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    assert_eq!(result.actions_executed, 1);
    assert_eq!(sink.typed_texts(), vec!["after".to_string()]);
}

#[test]
fn engine_retry_floor_applies_over_action_count() {
    let sink = Arc::new(MockSink::new());
    let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(1, 1));
    action.retry_count = 1;
    // Two scripted failures, then success: only reachable with the
    // engine-wide floor of three attempts.
    sink.fail_action(
        action.action_id,
        RpaError::SynthesisFailed("transient".to_string()),
        2,
    );
    let id = action.action_id;

    let recording = completed_recording(vec![action]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.max_retry_attempts = 3;

    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    assert_eq!(sink.attempt_count(id), 3);
}

#[test]
fn replay_wall_time_is_bounded_by_speed() {
    let sink = Arc::new(MockSink::new());
    let recording = completed_recording(vec![
        Action::wait(100),
        Action::wait(100),
        Action::wait(100),
    ]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.speed_multiplier = 2.0;

    let started = Instant::now();
    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    // Nominal 300ms at 2x is 150ms; allow a scheduler quantum per action.
    assert!(elapsed >= Duration::from_millis(140), "too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "too slow: {elapsed:?}");
}

#[test]
fn cancellation_is_prompt() {
    let sink = Arc::new(MockSink::new());
    let actions = (0..20).map(|_| Action::wait(50)).collect();
    let recording = completed_recording(actions);
    let player = player_with(&sink);
    let token = CancelToken::new();

    let canceller = token.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(120));
        canceller.cancel();
    });

    let result = player
        .run(&recording, Some(fast_settings()), &token)
        .unwrap();
    handle.join().unwrap();

    match result.outcome {
        PlaybackOutcome::Cancelled { index } => {
            // At ~120ms in, two to three 50ms waits have run; at most one
            // more action may complete after cancel() returns.
            assert!(index <= result.actions_executed as usize + 1);
            assert!(result.actions_executed < 6);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn ensure_foreground_activates_target_window() {
    let sink = Arc::new(MockSink::new());
    sink.add_window("Calculator", 42);

    let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(10, 10));
    if let ActionKind::Mouse { target_window, .. } = &mut action.kind {
        *target_window = Some(WindowTarget::by_title("Calculator"));
    }
    let recording = completed_recording(vec![action]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.ensure_foreground = true;

    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    assert_eq!(sink.activated_handles(), vec![42]);
}

#[test]
fn missing_foreground_window_does_not_block_replay() {
    let sink = Arc::new(MockSink::new());
    let mut action = Action::mouse_click(MouseButton::Left, Coordinate::new(10, 10));
    if let ActionKind::Mouse { target_window, .. } = &mut action.kind {
        *target_window = Some(WindowTarget::by_title("Gone"));
    }
    let recording = completed_recording(vec![action]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.ensure_foreground = true;

    // Activation fails twice (initial try plus one retry) and the action
    // itself still executes.
    let result = player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    assert_eq!(result.outcome, PlaybackOutcome::Completed);
    assert!(sink.activated_handles().is_empty());
}

#[test]
fn pre_replay_foreground_window_is_restored() {
    let sink = Arc::new(MockSink::new());
    sink.set_foreground(Some(7));

    let recording = completed_recording(vec![Action::wait(1)]);
    let player = player_with(&sink);
    let mut settings = fast_settings();
    settings.restore_window_positions = true;

    player
        .run(&recording, Some(settings), &CancelToken::new())
        .unwrap();
    assert_eq!(sink.activated_handles(), vec![7]);
}
