//! Shortcut configuration: chords excluded from capture, the reserved RPA
//! control bindings, and user-defined shortcut commands.

use crate::action::ValidationReport;
use crate::keys::KeyChord;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clipboard chords suppressed when `exclude_clipboard_keys` is on.
static CLIPBOARD_KEYS: Lazy<Vec<KeyChord>> = Lazy::new(|| {
    ["c", "v", "x", "z", "y"]
        .iter()
        .map(|k| KeyChord::ctrl(k))
        .collect()
});

/// Window-management chords suppressed when `exclude_window_keys` is on.
static WINDOW_KEYS: Lazy<Vec<KeyChord>> = Lazy::new(|| {
    vec![
        KeyChord::alt("f4"),
        KeyChord::alt("tab"),
        KeyChord::new(false, true, true, false, "tab"),
    ]
});

/// Application chords suppressed when `exclude_app_keys` is on.
static APP_KEYS: Lazy<Vec<KeyChord>> = Lazy::new(|| {
    let mut keys: Vec<KeyChord> = ["s", "n", "o", "w", "t", "a", "f", "h", "p"]
        .iter()
        .map(|k| KeyChord::ctrl(k))
        .collect();
    keys.push(KeyChord::new(true, true, false, false, "delete"));
    keys.push(KeyChord::ctrl_shift("esc"));
    keys.extend(["f1", "f5", "f11", "f12"].iter().map(|k| KeyChord::bare(k)));
    keys
});

/// Windows-key chords suppressed when `exclude_windows_keys` is on.
static WINDOWS_KEY_COMBINATIONS: Lazy<Vec<KeyChord>> = Lazy::new(|| {
    ["d", "e", "r", "l", "m", "tab", "i", "s", "x"]
        .iter()
        .map(|k| KeyChord::win(k))
        .collect()
});

/// The reserved control actions the filter recognizes and suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    StartStop,
    PauseResume,
    EmergencyStop,
}

/// Capture exclusion rules plus the RPA control bindings and the custom
/// shortcut command list. A snapshot of this is handed to the event filter
/// and the hotkey dispatcher at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutSettings {
    pub exclude_clipboard_keys: bool,
    pub exclude_window_keys: bool,
    pub exclude_app_keys: bool,
    pub exclude_windows_keys: bool,
    #[serde(default)]
    pub custom_excluded_keys: Vec<KeyChord>,

    pub recording_start_stop_key: KeyChord,
    pub recording_pause_resume_key: KeyChord,
    pub emergency_stop_key: KeyChord,

    #[serde(default)]
    pub custom_commands: Vec<CustomShortcutCommand>,
}

impl Default for ShortcutSettings {
    fn default() -> Self {
        Self {
            exclude_clipboard_keys: true,
            exclude_window_keys: true,
            exclude_app_keys: true,
            exclude_windows_keys: true,
            custom_excluded_keys: Vec::new(),
            recording_start_stop_key: KeyChord::ctrl_shift("r"),
            recording_pause_resume_key: KeyChord::ctrl_shift("p"),
            emergency_stop_key: KeyChord::ctrl_shift("q"),
            custom_commands: Vec::new(),
        }
    }
}

impl ShortcutSettings {
    /// Every chord the filter must suppress, per the enabled categories
    /// plus the user's custom list.
    pub fn excluded_chords(&self) -> Vec<KeyChord> {
        let mut excluded = Vec::new();
        if self.exclude_clipboard_keys {
            excluded.extend(CLIPBOARD_KEYS.iter().cloned());
        }
        if self.exclude_window_keys {
            excluded.extend(WINDOW_KEYS.iter().cloned());
        }
        if self.exclude_app_keys {
            excluded.extend(APP_KEYS.iter().cloned());
        }
        if self.exclude_windows_keys {
            excluded.extend(WINDOWS_KEY_COMBINATIONS.iter().cloned());
        }
        excluded.extend(self.custom_excluded_keys.iter().cloned());
        excluded
    }

    pub fn should_exclude(&self, ctrl: bool, alt: bool, shift: bool, win: bool, key: &str) -> bool {
        self.excluded_chords()
            .iter()
            .any(|chord| chord.matches(ctrl, alt, shift, win, key))
    }

    /// Match against the three reserved control bindings.
    pub fn control_action(
        &self,
        ctrl: bool,
        alt: bool,
        shift: bool,
        win: bool,
        key: &str,
    ) -> Option<ControlAction> {
        if self
            .recording_start_stop_key
            .matches(ctrl, alt, shift, win, key)
        {
            Some(ControlAction::StartStop)
        } else if self
            .recording_pause_resume_key
            .matches(ctrl, alt, shift, win, key)
        {
            Some(ControlAction::PauseResume)
        } else if self.emergency_stop_key.matches(ctrl, alt, shift, win, key) {
            Some(ControlAction::EmergencyStop)
        } else {
            None
        }
    }

    pub fn add_custom_excluded_key(&mut self, chord: KeyChord) -> bool {
        if self.custom_excluded_keys.contains(&chord) {
            return false;
        }
        self.custom_excluded_keys.push(chord);
        true
    }

    pub fn remove_custom_excluded_key(&mut self, index: usize) -> bool {
        if index >= self.custom_excluded_keys.len() {
            return false;
        }
        self.custom_excluded_keys.remove(index);
        true
    }
}

/// What a custom shortcut does when its chord fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Launch a program, detached.
    Application,
    /// Open a file or folder with its default handler.
    FileOperation,
    /// Run a line through the platform shell.
    SystemCommand,
    /// Run a script with the interpreter its extension selects.
    ScriptExecution,
    /// Open a URL in the default browser.
    UrlOpen,
    /// Place a payload on the clipboard and paste it.
    TextInput,
}

/// Named argument appended to the spawned command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
    pub name: String,
    pub value: String,
}

/// A user-defined chord bound to an external side effect. Fired by the
/// hotkey dispatcher; never produces a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomShortcutCommand {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub chord: KeyChord,
    pub command_type: CommandType,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub run_as_admin: bool,
    #[serde(default)]
    pub wait_for_completion: bool,
    pub timeout_seconds: u32,
    /// Only run while a window whose title contains this pattern is active.
    #[serde(default)]
    pub active_window_title_pattern: String,
    /// Only run while a process whose name contains this pattern exists.
    #[serde(default)]
    pub active_process_name_pattern: String,
}

impl CustomShortcutCommand {
    pub fn new(name: &str, chord: KeyChord, command_type: CommandType, command: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            enabled: true,
            chord,
            command_type,
            command: command.to_string(),
            parameters: Vec::new(),
            working_directory: String::new(),
            run_as_admin: false,
            wait_for_completion: false,
            timeout_seconds: 30,
            active_window_title_pattern: String::new(),
            active_process_name_pattern: String::new(),
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.name.is_empty() {
            report.error("command name is empty");
        }
        if self.command.is_empty() {
            report.error("command string is empty");
        }
        if self.timeout_seconds == 0 || self.timeout_seconds > 3600 {
            report.error("timeout must be in 1..=3600 seconds");
        }
        match self.command_type {
            CommandType::UrlOpen => {
                if !(self.command.starts_with("http://") || self.command.starts_with("https://")) {
                    report.error("URL must use the http or https scheme");
                }
            }
            CommandType::ScriptExecution => {
                if script_interpreter(&self.command).is_none() {
                    report.error("unrecognized script extension");
                }
            }
            _ => {}
        }
        report
    }

    pub fn parameter_value(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Interpreter command for a script path, chosen by extension.
pub fn script_interpreter(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_lowercase();
    match ext.as_str() {
        "py" => Some("python"),
        "bat" | "cmd" => Some(if cfg!(windows) { "cmd" } else { "sh" }),
        "ps1" => Some("powershell"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipboard_exclusion_matches_ctrl_c() {
        let settings = ShortcutSettings::default();
        assert!(settings.should_exclude(true, false, false, false, "c"));
        assert!(settings.should_exclude(true, false, false, false, "v"));
        assert!(!settings.should_exclude(false, false, false, false, "a"));
    }

    #[test]
    fn disabling_category_stops_exclusion() {
        let settings = ShortcutSettings {
            exclude_clipboard_keys: false,
            ..Default::default()
        };
        assert!(!settings.should_exclude(true, false, false, false, "c"));
        // Other categories still apply.
        assert!(settings.should_exclude(false, true, false, false, "f4"));
    }

    #[test]
    fn custom_exclusions_are_deduplicated() {
        let mut settings = ShortcutSettings::default();
        let chord = KeyChord::ctrl("k");
        assert!(settings.add_custom_excluded_key(chord.clone()));
        assert!(!settings.add_custom_excluded_key(chord.clone()));
        assert!(settings.should_exclude(true, false, false, false, "k"));
        assert!(settings.remove_custom_excluded_key(0));
        assert!(!settings.should_exclude(true, false, false, false, "k"));
    }

    #[test]
    fn control_chords_are_recognized() {
        let settings = ShortcutSettings::default();
        assert_eq!(
            settings.control_action(true, false, true, false, "r"),
            Some(ControlAction::StartStop)
        );
        assert_eq!(
            settings.control_action(true, false, true, false, "q"),
            Some(ControlAction::EmergencyStop)
        );
        assert_eq!(settings.control_action(true, false, false, false, "r"), None);
    }

    #[test]
    fn command_validation() {
        let ok = CustomShortcutCommand::new(
            "browser",
            KeyChord::ctrl("b"),
            CommandType::UrlOpen,
            "https://example.com",
        );
        assert!(ok.validate().is_valid());

        let bad_url = CustomShortcutCommand::new(
            "bad",
            KeyChord::ctrl("b"),
            CommandType::UrlOpen,
            "ftp://example.com",
        );
        assert!(!bad_url.validate().is_valid());

        let bad_script = CustomShortcutCommand::new(
            "script",
            KeyChord::ctrl("s"),
            CommandType::ScriptExecution,
            "run.xyz",
        );
        assert!(!bad_script.validate().is_valid());
    }

    #[test]
    fn script_interpreter_by_extension() {
        assert_eq!(script_interpreter("job.py"), Some("python"));
        assert_eq!(script_interpreter("job.ps1"), Some("powershell"));
        assert!(script_interpreter("job.txt").is_none());
    }
}
