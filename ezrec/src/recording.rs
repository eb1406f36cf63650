//! Recording aggregate: an ordered, named, validated sequence of actions.
//!
//! Status machine: `Created → Recording ⇄ Paused → Completed | Cancelled`,
//! with `Failed` reserved for storage-level damage. Mutation is only
//! allowed in the editable states; every mutation re-indexes the sequence
//! so `sequence_number[i] == i` always holds.

use crate::action::{Action, ActionKind, ValidationReport};
use crate::errors::{Result, RpaError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on actions per recording.
pub const MAX_ACTIONS: usize = 10_000;

/// Name length bounds.
pub const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Created,
    Recording,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Created => "created",
            RecordingStatus::Recording => "recording",
            RecordingStatus::Paused => "paused",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Cancelled => "cancelled",
            RecordingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(RecordingStatus::Created),
            "recording" => Ok(RecordingStatus::Recording),
            "paused" => Ok(RecordingStatus::Paused),
            "completed" => Ok(RecordingStatus::Completed),
            "cancelled" => Ok(RecordingStatus::Cancelled),
            "failed" => Ok(RecordingStatus::Failed),
            other => Err(RpaError::Corruption(format!(
                "unknown recording status: {other}"
            ))),
        }
    }
}

/// Replay policy carried by the recording and overridable per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Applies to inter-action delays and Wait actions, not to synthesis.
    pub speed_multiplier: f64,
    /// Fallback delay between actions when an action carries none, ms.
    pub default_delay: u64,
    /// Engine-wide retry floor; the effective attempt count per action is
    /// `max(action.retry_count, max_retry_attempts)`.
    pub max_retry_attempts: u32,
    pub stop_on_error: bool,
    /// Record the pre-replay foreground window and restore it on finish.
    pub restore_window_positions: bool,
    /// Activate an action's target window before synthesizing into it.
    pub ensure_foreground: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            default_delay: 500,
            max_retry_attempts: 3,
            stop_on_error: true,
            restore_window_positions: true,
            ensure_foreground: true,
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.speed_multiplier <= 0.0 || self.speed_multiplier > 10.0 {
            report.error("speed multiplier must be in (0, 10]");
        }
        if self.max_retry_attempts > 10 {
            report.error("max retry attempts must be at most 10");
        }
        if self.speed_multiplier > 5.0 {
            report.warning("speed multiplier above 5x");
        }
        report
    }
}

/// Capture-time environment, for DPI rescaling and provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Host name of the capturing machine.
    #[serde(default)]
    pub recorded_on: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recorded_resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recorded_dpi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub os_version: Option<String>,
    /// Sum of delays plus wait durations, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimated_duration_ms: Option<u64>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Summary of the most recent replay of this recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: Uuid,
    pub name: String,
    pub status: RecordingStatus,
    pub actions: Vec<Action>,
    pub playback_settings: PlaybackSettings,
    pub metadata: RecordingMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_executions: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_execution: Option<ExecutionSummary>,

    /// Size of the persisted blob and hash of the canonical bytes. Set by
    /// the storage layer; excluded from the canonical form itself.
    #[serde(skip)]
    pub size: u64,
    #[serde(skip)]
    pub content_hash: String,
}

impl Recording {
    pub fn new(name: &str) -> Result<Self> {
        validate_name(name)?;
        let now = Utc::now();
        Ok(Self {
            recording_id: Uuid::new_v4(),
            name: name.to_string(),
            status: RecordingStatus::Created,
            actions: Vec::new(),
            playback_settings: PlaybackSettings::default(),
            metadata: RecordingMetadata::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            total_executions: 0,
            last_execution: None,
            size: 0,
            content_hash: String::new(),
        })
    }

    pub fn rename(&mut self, name: &str) -> Result<()> {
        self.ensure_editable()?;
        validate_name(name)?;
        self.name = name.to_string();
        self.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sequence mutation: editable states only, always re-indexed.
    // ------------------------------------------------------------------

    pub fn add_action(&mut self, action: Action) -> Result<()> {
        self.ensure_editable()?;
        if self.actions.len() >= MAX_ACTIONS {
            return Err(RpaError::Validation(format!(
                "recording holds the maximum of {MAX_ACTIONS} actions"
            )));
        }
        self.actions.push(action);
        self.reindex();
        self.touch();
        Ok(())
    }

    pub fn insert_action(&mut self, index: usize, action: Action) -> Result<()> {
        self.ensure_editable()?;
        if index > self.actions.len() {
            return Err(RpaError::Validation(format!(
                "insert index {index} out of bounds"
            )));
        }
        if self.actions.len() >= MAX_ACTIONS {
            return Err(RpaError::Validation(format!(
                "recording holds the maximum of {MAX_ACTIONS} actions"
            )));
        }
        self.actions.insert(index, action);
        self.reindex();
        self.touch();
        Ok(())
    }

    pub fn remove_action(&mut self, action_id: Uuid) -> Result<()> {
        self.ensure_editable()?;
        let before = self.actions.len();
        self.actions.retain(|a| a.action_id != action_id);
        if self.actions.len() == before {
            return Err(RpaError::NotFound(format!("action {action_id}")));
        }
        self.reindex();
        self.touch();
        Ok(())
    }

    pub fn get_action(&self, action_id: Uuid) -> Option<&Action> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }

    // ------------------------------------------------------------------
    // Status transitions.
    // ------------------------------------------------------------------

    pub fn start_recording(&mut self) -> Result<()> {
        match self.status {
            RecordingStatus::Created => {
                self.status = RecordingStatus::Recording;
                self.touch();
                Ok(())
            }
            other => Err(RpaError::Validation(format!(
                "cannot start recording from {}",
                other.as_str()
            ))),
        }
    }

    pub fn pause_recording(&mut self) -> Result<()> {
        match self.status {
            RecordingStatus::Recording => {
                self.status = RecordingStatus::Paused;
                self.touch();
                Ok(())
            }
            other => Err(RpaError::Validation(format!(
                "cannot pause from {}",
                other.as_str()
            ))),
        }
    }

    pub fn resume_recording(&mut self) -> Result<()> {
        match self.status {
            RecordingStatus::Paused => {
                self.status = RecordingStatus::Recording;
                self.touch();
                Ok(())
            }
            other => Err(RpaError::Validation(format!(
                "cannot resume from {}",
                other.as_str()
            ))),
        }
    }

    /// Transition to `Completed`. `completed_at` is set exactly once, here.
    pub fn complete_recording(&mut self) -> Result<()> {
        match self.status {
            RecordingStatus::Recording | RecordingStatus::Paused => {
                self.status = RecordingStatus::Completed;
                self.completed_at = Some(Utc::now());
                self.recompute_estimated_duration();
                self.touch();
                Ok(())
            }
            other => Err(RpaError::Validation(format!(
                "cannot complete from {}",
                other.as_str()
            ))),
        }
    }

    pub fn cancel_recording(&mut self) -> Result<()> {
        match self.status {
            RecordingStatus::Completed | RecordingStatus::Cancelled => Err(RpaError::Validation(
                format!("cannot cancel from {}", self.status.as_str()),
            )),
            _ => {
                self.status = RecordingStatus::Cancelled;
                self.actions.clear();
                self.touch();
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Predicates and derived values.
    // ------------------------------------------------------------------

    pub fn can_be_edited(&self) -> bool {
        matches!(
            self.status,
            RecordingStatus::Created | RecordingStatus::Recording | RecordingStatus::Paused
        )
    }

    /// Executable iff completed, non-empty, and validation passes.
    pub fn can_be_executed(&self) -> bool {
        self.status == RecordingStatus::Completed
            && !self.actions.is_empty()
            && self.validate().is_valid()
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if let Err(RpaError::Validation(msg)) = validate_name(&self.name) {
            report.error(msg);
        }
        if self.actions.len() > MAX_ACTIONS {
            report.error(format!("more than {MAX_ACTIONS} actions"));
        }
        for (i, action) in self.actions.iter().enumerate() {
            if action.sequence_number as usize != i {
                report.error(format!(
                    "action at index {i} carries sequence number {}",
                    action.sequence_number
                ));
            }
            let inner = action.validate();
            for err in inner.errors {
                report.error(format!("action {i}: {err}"));
            }
            for warn in inner.warnings {
                report.warning(format!("action {i}: {warn}"));
            }
        }
        report.merge(self.playback_settings.validate());
        report
    }

    /// Sum of per-action delays plus wait durations, milliseconds.
    pub fn estimated_duration_ms(&self) -> u64 {
        self.actions
            .iter()
            .map(|a| {
                let wait = match &a.kind {
                    ActionKind::Wait { duration_ms } => *duration_ms,
                    _ => 0,
                };
                a.delay_before + a.delay_after + wait
            })
            .sum()
    }

    /// Copy with fresh identities, reset to `Created`.
    pub fn clone_new_id(&self, new_name: Option<&str>) -> Result<Self> {
        let name = match new_name {
            Some(n) => n.to_string(),
            None => format!("{} (copy)", self.name),
        };
        validate_name(&name)?;
        let now = Utc::now();
        let mut cloned = self.clone();
        cloned.recording_id = Uuid::new_v4();
        cloned.name = name;
        cloned.status = RecordingStatus::Created;
        cloned.created_at = now;
        cloned.updated_at = now;
        cloned.completed_at = None;
        cloned.total_executions = 0;
        cloned.last_execution = None;
        cloned.actions = self.actions.iter().map(Action::clone_new_id).collect();
        cloned.reindex();
        Ok(cloned)
    }

    /// Record a finished replay in the aggregate counters.
    pub fn mark_execution(&mut self, success: bool, duration_ms: u64) {
        self.total_executions += 1;
        self.last_execution = Some(ExecutionSummary {
            executed_at: Utc::now(),
            success,
            duration_ms,
        });
        self.touch();
    }

    fn ensure_editable(&self) -> Result<()> {
        if self.can_be_edited() {
            Ok(())
        } else {
            Err(RpaError::Validation(format!(
                "recording is immutable in status {}",
                self.status.as_str()
            )))
        }
    }

    fn reindex(&mut self) {
        for (i, action) in self.actions.iter_mut().enumerate() {
            action.sequence_number = i as u32;
        }
    }

    fn recompute_estimated_duration(&mut self) {
        self.metadata.estimated_duration_ms = Some(self.estimated_duration_ms());
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 {
        return Err(RpaError::Validation("recording name is empty".to_string()));
    }
    if len > MAX_NAME_LEN {
        return Err(RpaError::Validation(format!(
            "recording name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Coordinate, MouseButton};

    fn completed_recording() -> Recording {
        let mut rec = Recording::new("test").unwrap();
        rec.start_recording().unwrap();
        rec.add_action(Action::mouse_click(MouseButton::Left, Coordinate::new(1, 2)))
            .unwrap();
        rec.complete_recording().unwrap();
        rec
    }

    #[test]
    fn name_bounds() {
        assert!(Recording::new("").is_err());
        assert!(Recording::new(&"x".repeat(101)).is_err());
        assert!(Recording::new(&"x".repeat(100)).is_ok());
    }

    #[test]
    fn sequence_numbers_stay_contiguous() {
        let mut rec = Recording::new("seq").unwrap();
        for _ in 0..5 {
            rec.add_action(Action::wait(10)).unwrap();
        }
        let victim = rec.actions[2].action_id;
        rec.remove_action(victim).unwrap();
        for (i, action) in rec.actions.iter().enumerate() {
            assert_eq!(action.sequence_number as usize, i);
        }
        rec.insert_action(1, Action::wait(20)).unwrap();
        for (i, action) in rec.actions.iter().enumerate() {
            assert_eq!(action.sequence_number as usize, i);
        }
    }

    #[test]
    fn completed_recording_is_immutable() {
        let mut rec = completed_recording();
        assert!(rec.add_action(Action::wait(1)).is_err());
        assert!(rec.rename("other").is_err());
    }

    #[test]
    fn completed_at_set_exactly_once() {
        let rec = completed_recording();
        let first = rec.completed_at.unwrap();
        let mut rec2 = rec.clone();
        assert!(rec2.complete_recording().is_err());
        assert_eq!(rec2.completed_at.unwrap(), first);
    }

    #[test]
    fn executable_requires_completed_and_nonempty() {
        let mut empty = Recording::new("empty").unwrap();
        empty.start_recording().unwrap();
        empty.complete_recording().unwrap();
        assert!(!empty.can_be_executed());

        assert!(completed_recording().can_be_executed());

        let mut editing = Recording::new("editing").unwrap();
        editing.start_recording().unwrap();
        editing.add_action(Action::wait(10)).unwrap();
        assert!(!editing.can_be_executed());
    }

    #[test]
    fn pause_resume_round_trip() {
        let mut rec = Recording::new("p").unwrap();
        rec.start_recording().unwrap();
        rec.pause_recording().unwrap();
        assert!(rec.pause_recording().is_err());
        rec.resume_recording().unwrap();
        rec.complete_recording().unwrap();
    }

    #[test]
    fn cancel_discards_actions() {
        let mut rec = Recording::new("c").unwrap();
        rec.start_recording().unwrap();
        rec.add_action(Action::wait(10)).unwrap();
        rec.cancel_recording().unwrap();
        assert!(rec.is_empty());
        assert_eq!(rec.status, RecordingStatus::Cancelled);
    }

    #[test]
    fn estimated_duration_sums_delays_and_waits() {
        let mut rec = Recording::new("d").unwrap();
        rec.start_recording().unwrap();
        let mut a = Action::wait(100);
        a.delay_before = 50;
        a.delay_after = 25;
        rec.add_action(a).unwrap();
        rec.add_action(Action::mouse_click(MouseButton::Left, Coordinate::new(0, 0)))
            .unwrap();
        assert_eq!(rec.estimated_duration_ms(), 175);
        rec.complete_recording().unwrap();
        assert_eq!(rec.metadata.estimated_duration_ms, Some(175));
    }

    #[test]
    fn clone_new_id_resets_lifecycle() {
        let rec = completed_recording();
        let cloned = rec.clone_new_id(None).unwrap();
        assert_ne!(cloned.recording_id, rec.recording_id);
        assert_eq!(cloned.status, RecordingStatus::Created);
        assert_eq!(cloned.action_count(), rec.action_count());
        assert_ne!(cloned.actions[0].action_id, rec.actions[0].action_id);
    }

    #[test]
    fn playback_settings_bounds() {
        let mut settings = PlaybackSettings {
            speed_multiplier: 0.0,
            ..Default::default()
        };
        assert!(!settings.validate().is_valid());
        settings.speed_multiplier = 10.5;
        assert!(!settings.validate().is_valid());
        settings.speed_multiplier = 10.0;
        settings.max_retry_attempts = 11;
        assert!(!settings.validate().is_valid());
    }
}
