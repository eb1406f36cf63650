//! Schedule aggregate: a (recording, trigger, policy) bundle plus its
//! execution history and aggregate counters.
//!
//! Trigger evaluation is pure: `next_fire_after` computes the next
//! wall-clock fire time from `now` and the last execution; the scheduler
//! loop owns the polling cadence and dispatch.

use crate::action::ValidationReport;
use crate::errors::{Result, RpaError};
use crate::keys::KeyChord;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Execution-history ring bound: only the most recent entries are kept.
pub const HISTORY_LIMIT: usize = 100;

/// Default per-execution wall-clock bound, milliseconds (one hour).
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Inactive,
    Active,
    Running,
    Completed,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Inactive => "inactive",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Running => "running",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "inactive" => Ok(ScheduleStatus::Inactive),
            "active" => Ok(ScheduleStatus::Active),
            "running" => Ok(ScheduleStatus::Running),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            other => Err(RpaError::Corruption(format!(
                "unknown schedule status: {other}"
            ))),
        }
    }
}

/// Time of day for `Scheduled` triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub second: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(RpaError::Validation(format!(
                "invalid time of day: {hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Parse `"14:30"` or `"14:30:15"`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(RpaError::Validation(format!("invalid time format: {s}")));
        }
        let field = |i: usize| -> Result<u32> {
            parts
                .get(i)
                .map_or(Ok(0), |p| {
                    p.parse()
                        .map_err(|_| RpaError::Validation(format!("invalid time format: {s}")))
                })
        };
        Self::new(field(0)?, field(1)?, field(2)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

/// Interval-based repetition with optional exhaustion bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatRule {
    pub unit: RepeatUnit,
    pub interval: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_occurrences: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl RepeatRule {
    pub fn new(unit: RepeatUnit, interval: u32) -> Result<Self> {
        if interval == 0 {
            return Err(RpaError::Validation(
                "repeat interval must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            unit,
            interval,
            max_occurrences: None,
            end_date: None,
        })
    }

    /// Next occurrence strictly after `last`, or `None` when the rule is
    /// exhausted by `end_date` or `occurrences_so_far`.
    pub fn next_after(
        &self,
        last: DateTime<Utc>,
        occurrences_so_far: u64,
    ) -> Option<DateTime<Utc>> {
        if let Some(max) = self.max_occurrences {
            if occurrences_so_far >= max {
                return None;
            }
        }
        let next = match self.unit {
            RepeatUnit::Minutes => last + ChronoDuration::minutes(self.interval as i64),
            RepeatUnit::Hours => last + ChronoDuration::hours(self.interval as i64),
            RepeatUnit::Days => last + ChronoDuration::days(self.interval as i64),
            RepeatUnit::Weeks => last + ChronoDuration::weeks(self.interval as i64),
            RepeatUnit::Months => add_months(last, self.interval),
        };
        match self.end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

/// Calendar-month addition with year carry; the day clamps to the length
/// of the target month.
fn add_months(ts: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let mut year = ts.year();
    let mut month = ts.month() as i32 + months as i32;
    while month > 12 {
        year += 1;
        month -= 12;
    }
    let mut day = ts.day();
    let date = loop {
        match NaiveDate::from_ymd_opt(year, month as u32, day) {
            Some(d) => break d,
            None => day -= 1,
        }
    };
    Utc.from_utc_datetime(&date.and_time(ts.time()))
}

/// The predicate that fires a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    Scheduled {
        time: TimeOfDay,
        /// ISO weekdays, Monday = 1 through Sunday = 7. Empty = every day.
        #[serde(default)]
        weekdays: BTreeSet<u8>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        repeat: Option<RepeatRule>,
    },
    FileWatcher {
        path: String,
    },
    Hotkey {
        chord: String,
    },
    Idle {
        duration_ms: u64,
    },
    Startup {
        #[serde(default)]
        delay_ms: u64,
    },
    Manual,
}

impl TriggerCondition {
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        match self {
            TriggerCondition::Scheduled {
                weekdays, repeat, ..
            } => {
                if weekdays.iter().any(|d| *d == 0 || *d > 7) {
                    report.error("weekdays must be ISO 1..=7");
                }
                if let Some(rule) = repeat {
                    if rule.interval == 0 {
                        report.error("repeat interval must be at least 1");
                    }
                }
            }
            TriggerCondition::FileWatcher { path } => {
                if path.is_empty() {
                    report.error("file watcher needs a path");
                }
            }
            TriggerCondition::Hotkey { chord } => {
                if let Err(RpaError::Validation(msg)) = KeyChord::parse(chord) {
                    report.error(format!("invalid hotkey chord: {msg}"));
                }
            }
            TriggerCondition::Idle { duration_ms } => {
                if *duration_ms == 0 {
                    report.error("idle duration must be positive");
                } else if *duration_ms < 60_000 {
                    report.warning("idle duration under one minute");
                }
            }
            TriggerCondition::Startup { delay_ms } => {
                if *delay_ms > 300_000 {
                    report.warning("startup delay above five minutes");
                }
            }
            TriggerCondition::Manual => {}
        }
        report
    }

    /// True when the scheduler's polling loop evaluates this trigger;
    /// event-based triggers fire through `Scheduler::notify` instead.
    pub fn is_polled(&self) -> bool {
        matches!(
            self,
            TriggerCondition::Scheduled { .. } | TriggerCondition::Startup { .. }
        )
    }

    /// Next wall-clock fire time for polled triggers.
    ///
    /// `Scheduled`: the next instant at or after `now` whose time of day
    /// matches and, when a weekday set is given, whose ISO weekday is in
    /// the set. Without a repeat rule, a trigger that already fired on a
    /// given day advances to the next eligible day. With a repeat rule,
    /// subsequent fires step from the last execution.
    pub fn next_fire_after(
        &self,
        now: DateTime<Utc>,
        last_execution: Option<DateTime<Utc>>,
        occurrences_so_far: u64,
    ) -> Option<DateTime<Utc>> {
        match self {
            TriggerCondition::Scheduled {
                time,
                weekdays,
                repeat,
            } => {
                if let (Some(rule), Some(last)) = (repeat, last_execution) {
                    return rule.next_after(last, occurrences_so_far);
                }

                let mut candidate = Utc.from_utc_datetime(
                    &now.date_naive()
                        .and_hms_opt(time.hour, time.minute, time.second)
                        .expect("validated time of day"),
                );
                if candidate < now {
                    candidate += ChronoDuration::days(1);
                }
                if let Some(last) = last_execution {
                    // Already fired today: advance one day.
                    if last.date_naive() == candidate.date_naive() {
                        candidate += ChronoDuration::days(1);
                    }
                }
                if !weekdays.is_empty() {
                    for _ in 0..7 {
                        let iso = candidate.weekday().number_from_monday() as u8;
                        if weekdays.contains(&iso) {
                            break;
                        }
                        candidate += ChronoDuration::days(1);
                    }
                }
                Some(candidate)
            }
            // The scheduler anchors startup triggers to process start.
            TriggerCondition::Startup { .. } => None,
            _ => None,
        }
    }
}

/// One run of a schedule. Immutable once `end_time` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub schedule_id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    pub actions_executed: u32,
    pub total_actions: u32,
}

impl ExecutionResult {
    pub fn begin(schedule_id: Uuid, start_time: DateTime<Utc>, total_actions: u32) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            schedule_id,
            start_time,
            end_time: None,
            success: false,
            error_message: None,
            actions_executed: 0,
            total_actions,
        }
    }

    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0) as u64)
    }

    /// 0.0..=1.0 share of actions that ran.
    pub fn completion_rate(&self) -> f64 {
        if self.total_actions == 0 {
            return 0.0;
        }
        (self.actions_executed as f64 / self.total_actions as f64).min(1.0)
    }

    pub fn mark_completed(
        &mut self,
        end_time: DateTime<Utc>,
        success: bool,
        error_message: Option<String>,
        actions_executed: u32,
    ) -> Result<()> {
        if self.end_time.is_some() {
            return Err(RpaError::Validation(
                "execution result is already finalized".to_string(),
            ));
        }
        self.end_time = Some(end_time);
        self.success = success;
        self.error_message = error_message;
        self.actions_executed = actions_executed;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub recording_id: Uuid,
    pub trigger: TriggerCondition,
    pub status: ScheduleStatus,
    /// Orthogonal to status: a disabled schedule is never dispatched even
    /// while `Active`.
    pub enabled: bool,
    pub max_parallel_executions: u32,
    pub execution_timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_execution: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_execution: Option<DateTime<Utc>>,
    /// Most recent runs, newest last, bounded to [`HISTORY_LIMIT`].
    #[serde(default)]
    pub execution_history: Vec<ExecutionResult>,
    pub total_executions: u64,
    pub successful_executions: u64,
}

impl Schedule {
    pub fn new(name: &str, recording_id: Uuid, trigger: TriggerCondition) -> Self {
        let now = Utc::now();
        let name = if name.is_empty() {
            format!("schedule_{}", now.format("%Y%m%d_%H%M%S"))
        } else {
            name.to_string()
        };
        Self {
            schedule_id: Uuid::new_v4(),
            name,
            description: String::new(),
            recording_id,
            trigger,
            status: ScheduleStatus::Inactive,
            enabled: true,
            max_parallel_executions: 1,
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            created_at: now,
            updated_at: now,
            next_execution: None,
            last_execution: None,
            execution_history: Vec::new(),
            total_executions: 0,
            successful_executions: 0,
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.max_parallel_executions == 0 {
            report.error("max parallel executions must be at least 1");
        }
        if self.execution_timeout_ms == 0 {
            report.error("execution timeout must be positive");
        }
        report.merge(self.trigger.validate());
        report
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.enabled {
            return Err(RpaError::Validation(
                "cannot activate a disabled schedule".to_string(),
            ));
        }
        self.validate().into_result()?;
        self.status = ScheduleStatus::Active;
        self.recompute_next_execution(now);
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) -> Result<()> {
        if self.status == ScheduleStatus::Running {
            return Err(RpaError::Validation(
                "cannot deactivate a running schedule".to_string(),
            ));
        }
        self.status = ScheduleStatus::Inactive;
        self.next_execution = None;
        self.touch();
        Ok(())
    }

    pub fn running_count(&self) -> usize {
        self.execution_history
            .iter()
            .filter(|r| r.is_running())
            .count()
    }

    /// Begin one run. Enforces the per-schedule parallelism bound.
    pub fn start_execution(
        &mut self,
        now: DateTime<Utc>,
        total_actions: u32,
    ) -> Result<ExecutionResult> {
        if !self.enabled {
            return Err(RpaError::Validation("schedule is disabled".to_string()));
        }
        if !matches!(
            self.status,
            ScheduleStatus::Active | ScheduleStatus::Running | ScheduleStatus::Failed
        ) {
            return Err(RpaError::Validation(format!(
                "schedule is not dispatchable in status {}",
                self.status.as_str()
            )));
        }
        if self.running_count() >= self.max_parallel_executions as usize {
            return Err(RpaError::Validation(
                "parallel execution limit reached".to_string(),
            ));
        }
        let result = ExecutionResult::begin(self.schedule_id, now, total_actions);
        self.execution_history.push(result.clone());
        self.status = ScheduleStatus::Running;
        self.last_execution = Some(now);
        self.touch();
        Ok(result)
    }

    /// Finish one run: updates counters, trims history, recomputes the
    /// next fire time, and applies the failed-until-next-success rule.
    /// Cancelled runs count as executions but not as failures.
    pub fn complete_execution(
        &mut self,
        execution_id: Uuid,
        end_time: DateTime<Utc>,
        success: bool,
        error_message: Option<String>,
        actions_executed: u32,
        cancelled: bool,
    ) -> Result<ExecutionResult> {
        let entry = self
            .execution_history
            .iter_mut()
            .find(|r| r.execution_id == execution_id)
            .ok_or_else(|| RpaError::NotFound(format!("execution {execution_id}")))?;
        entry.mark_completed(end_time, success, error_message, actions_executed)?;
        let finished = entry.clone();

        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        }
        if self.execution_history.len() > HISTORY_LIMIT {
            let excess = self.execution_history.len() - HISTORY_LIMIT;
            self.execution_history.drain(..excess);
        }

        if self.running_count() == 0 {
            self.status = if success || cancelled {
                ScheduleStatus::Active
            } else {
                ScheduleStatus::Failed
            };
        }
        self.recompute_next_execution(end_time);
        if self.trigger_exhausted() {
            self.status = ScheduleStatus::Completed;
            self.next_execution = None;
        }
        self.touch();
        Ok(finished)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.total_executions as f64
    }

    pub fn recompute_next_execution(&mut self, now: DateTime<Utc>) {
        self.next_execution =
            self.trigger
                .next_fire_after(now, self.last_execution, self.total_executions);
    }

    fn trigger_exhausted(&self) -> bool {
        match &self.trigger {
            TriggerCondition::Scheduled {
                repeat: Some(rule), ..
            } => {
                self.last_execution.is_some()
                    && rule
                        .next_after(self.last_execution.unwrap(), self.total_executions)
                        .is_none()
            }
            _ => false,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    fn daily_at(hour: u32, minute: u32) -> TriggerCondition {
        TriggerCondition::Scheduled {
            time: TimeOfDay::new(hour, minute, 0).unwrap(),
            weekdays: BTreeSet::new(),
            repeat: None,
        }
    }

    #[test]
    fn scheduled_fires_later_today_or_tomorrow() {
        let trigger = daily_at(9, 0);
        let before = ts("2026-03-02 08:00:00");
        assert_eq!(
            trigger.next_fire_after(before, None, 0),
            Some(ts("2026-03-02 09:00:00"))
        );
        let after = ts("2026-03-02 10:00:00");
        assert_eq!(
            trigger.next_fire_after(after, None, 0),
            Some(ts("2026-03-03 09:00:00"))
        );
    }

    #[test]
    fn scheduled_already_fired_today_advances() {
        let trigger = daily_at(9, 0);
        let now = ts("2026-03-02 08:59:00");
        let last = Some(ts("2026-03-02 09:00:00"));
        // Fired today; no repeat rule, so the next fire is tomorrow even
        // though today's slot is still ahead of `now`.
        assert_eq!(
            trigger.next_fire_after(now, last, 1),
            Some(ts("2026-03-03 09:00:00"))
        );
    }

    #[test]
    fn weekday_set_skips_to_eligible_day() {
        // 2026-03-02 is a Monday.
        let trigger = TriggerCondition::Scheduled {
            time: TimeOfDay::new(9, 0, 0).unwrap(),
            weekdays: [6u8, 7u8].into_iter().collect(), // weekend only
            repeat: None,
        };
        let now = ts("2026-03-02 10:00:00");
        assert_eq!(
            trigger.next_fire_after(now, None, 0),
            Some(ts("2026-03-07 09:00:00"))
        );
    }

    #[test]
    fn repeat_rule_steps_from_last_execution() {
        let trigger = TriggerCondition::Scheduled {
            time: TimeOfDay::new(9, 0, 0).unwrap(),
            weekdays: BTreeSet::new(),
            repeat: Some(RepeatRule::new(RepeatUnit::Hours, 6).unwrap()),
        };
        let last = ts("2026-03-02 09:00:00");
        assert_eq!(
            trigger.next_fire_after(ts("2026-03-02 09:00:01"), Some(last), 1),
            Some(ts("2026-03-02 15:00:00"))
        );
    }

    #[test]
    fn repeat_rule_exhausts_on_max_occurrences() {
        let mut rule = RepeatRule::new(RepeatUnit::Days, 1).unwrap();
        rule.max_occurrences = Some(3);
        assert!(rule.next_after(ts("2026-03-02 09:00:00"), 3).is_none());
        assert!(rule.next_after(ts("2026-03-02 09:00:00"), 2).is_some());
    }

    #[test]
    fn repeat_rule_respects_end_date() {
        let mut rule = RepeatRule::new(RepeatUnit::Days, 1).unwrap();
        rule.end_date = Some(ts("2026-03-03 00:00:00"));
        assert!(rule.next_after(ts("2026-03-02 09:00:00"), 0).is_none());
    }

    #[test]
    fn month_addition_clamps_day() {
        // Jan 31 + 1 month clamps to Feb 28 (2026 is not a leap year).
        let next = add_months(ts("2026-01-31 09:00:00"), 1);
        assert_eq!(next, ts("2026-02-28 09:00:00"));
    }

    #[test]
    fn start_execution_enforces_parallel_limit() {
        let mut schedule = Schedule::new("s", Uuid::new_v4(), daily_at(9, 0));
        schedule.activate(ts("2026-03-02 08:00:00")).unwrap();
        let now = ts("2026-03-02 09:00:00");
        schedule.start_execution(now, 5).unwrap();
        assert!(schedule.start_execution(now, 5).is_err());
    }

    #[test]
    fn complete_execution_updates_counters_and_status() {
        let mut schedule = Schedule::new("s", Uuid::new_v4(), daily_at(9, 0));
        schedule.activate(ts("2026-03-02 08:00:00")).unwrap();
        let start = ts("2026-03-02 09:00:00");
        let run = schedule.start_execution(start, 3).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Running);

        let end = ts("2026-03-02 09:00:05");
        let finished = schedule
            .complete_execution(run.execution_id, end, true, None, 3, false)
            .unwrap();
        assert_eq!(finished.duration_ms(), Some(5000));
        assert_eq!(schedule.total_executions, 1);
        assert_eq!(schedule.successful_executions, 1);
        assert_eq!(schedule.status, ScheduleStatus::Active);
        assert_eq!(schedule.next_execution, Some(ts("2026-03-03 09:00:00")));
    }

    #[test]
    fn failed_execution_marks_schedule_failed_until_next_success() {
        let mut schedule = Schedule::new("s", Uuid::new_v4(), daily_at(9, 0));
        schedule.activate(ts("2026-03-02 08:00:00")).unwrap();
        let run = schedule
            .start_execution(ts("2026-03-02 09:00:00"), 3)
            .unwrap();
        schedule
            .complete_execution(
                run.execution_id,
                ts("2026-03-02 09:00:05"),
                false,
                Some("boom".to_string()),
                1,
                false,
            )
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Failed);

        // Failed schedules stay dispatchable; the next success restores Active.
        let run = schedule
            .start_execution(ts("2026-03-03 09:00:00"), 3)
            .unwrap();
        schedule
            .complete_execution(
                run.execution_id,
                ts("2026-03-03 09:00:04"),
                true,
                None,
                3,
                false,
            )
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Active);
    }

    #[test]
    fn cancelled_execution_is_not_a_failure() {
        let mut schedule = Schedule::new("s", Uuid::new_v4(), daily_at(9, 0));
        schedule.activate(ts("2026-03-02 08:00:00")).unwrap();
        let run = schedule
            .start_execution(ts("2026-03-02 09:00:00"), 3)
            .unwrap();
        schedule
            .complete_execution(
                run.execution_id,
                ts("2026-03-02 09:00:05"),
                false,
                Some("cancelled".to_string()),
                1,
                true,
            )
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Active);
        assert_eq!(schedule.successful_executions, 0);
    }

    #[test]
    fn history_is_trimmed_to_limit() {
        let mut schedule = Schedule::new("s", Uuid::new_v4(), daily_at(9, 0));
        schedule.activate(ts("2026-01-01 00:00:00")).unwrap();
        for i in 0..(HISTORY_LIMIT + 20) {
            let start = ts("2026-01-01 00:00:00") + ChronoDuration::minutes(i as i64);
            let run = schedule.start_execution(start, 1).unwrap();
            schedule
                .complete_execution(
                    run.execution_id,
                    start + ChronoDuration::seconds(1),
                    true,
                    None,
                    1,
                    false,
                )
                .unwrap();
        }
        assert_eq!(schedule.execution_history.len(), HISTORY_LIMIT);
        assert_eq!(schedule.total_executions, (HISTORY_LIMIT + 20) as u64);
    }

    #[test]
    fn finalized_result_is_immutable() {
        let mut result = ExecutionResult::begin(Uuid::new_v4(), ts("2026-03-02 09:00:00"), 2);
        result
            .mark_completed(ts("2026-03-02 09:00:01"), true, None, 2)
            .unwrap();
        assert!(result
            .mark_completed(ts("2026-03-02 09:00:02"), false, None, 2)
            .is_err());
    }

    #[test]
    fn trigger_json_shape() {
        let trigger = TriggerCondition::Scheduled {
            time: TimeOfDay::new(9, 0, 0).unwrap(),
            weekdays: [1u8, 3u8].into_iter().collect(),
            repeat: None,
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "scheduled");
        assert_eq!(json["time"]["hour"], 9);
        let back: TriggerCondition = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);

        let manual: TriggerCondition = serde_json::from_str(r#"{"type":"manual"}"#).unwrap();
        assert_eq!(manual, TriggerCondition::Manual);
    }
}
