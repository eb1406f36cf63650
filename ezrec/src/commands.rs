//! Custom shortcut command execution.
//!
//! Chords bound through the hotkey dispatcher land here: launch a program,
//! open a file or URL with its default handler, run a shell line or a
//! script, or paste a text payload. Window/process preconditions gate the
//! spawn; timeouts bound `wait_for_completion` runs.

use crate::action::InputMethod;
use crate::errors::{Result, RpaError};
use crate::shortcuts::{script_interpreter, CommandType, CustomShortcutCommand};
use crate::sink::InputSink;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll cadence while waiting on a spawned process.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Host state the precondition checks read. Separated out so command
/// execution is testable without a desktop session.
pub trait HostInspector: Send + Sync {
    /// Title of the currently focused window, when the host can tell.
    fn active_window_title(&self) -> Option<String>;
    /// Names of the currently running processes.
    fn process_names(&self) -> Vec<String>;
}

/// Inspector for hosts without a desktop probe; preconditions that need
/// host state fail closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInspector;

impl HostInspector for NoopInspector {
    fn active_window_title(&self) -> Option<String> {
        None
    }

    fn process_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// How a command run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Waited for the process; it exited with this code.
    Completed { exit_code: Option<i32> },
    /// Spawned or handed to the OS without waiting.
    Launched,
    /// Disabled command; nothing ran.
    Skipped { reason: String },
}

/// Executes [`CustomShortcutCommand`]s. Text-input commands route through
/// the [`InputSink`] clipboard path and therefore share its clipboard lock.
pub struct CommandRunner {
    sink: Arc<dyn InputSink>,
    inspector: Arc<dyn HostInspector>,
}

impl CommandRunner {
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self {
            sink,
            inspector: Arc::new(NoopInspector),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn HostInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn execute(&self, command: &CustomShortcutCommand) -> Result<CommandOutcome> {
        if !command.enabled {
            return Ok(CommandOutcome::Skipped {
                reason: "command is disabled".to_string(),
            });
        }
        command.validate().into_result()?;
        self.check_preconditions(command)?;

        if command.run_as_admin {
            warn!(command = %command.name, "run-as-admin requested; elevation is host policy, launching unelevated");
        }

        info!(command = %command.name, kind = ?command.command_type, "executing shortcut command");
        match command.command_type {
            CommandType::Application => self.spawn_program(
                Command::new(&command.command),
                command,
            ),
            CommandType::SystemCommand => {
                let mut shell = if cfg!(windows) {
                    let mut c = Command::new("cmd");
                    c.arg("/C");
                    c
                } else {
                    let mut c = Command::new("sh");
                    c.arg("-c");
                    c
                };
                shell.arg(&command.command);
                self.spawn_program(shell, command)
            }
            CommandType::ScriptExecution => {
                let interpreter = script_interpreter(&command.command).ok_or_else(|| {
                    RpaError::Validation(format!("no interpreter for {}", command.command))
                })?;
                let mut program = Command::new(interpreter);
                program.arg(&command.command);
                self.spawn_program(program, command)
            }
            CommandType::FileOperation | CommandType::UrlOpen => {
                open::that_detached(&command.command)
                    .map_err(|e| RpaError::SynthesisFailed(format!("default handler: {e}")))?;
                Ok(CommandOutcome::Launched)
            }
            CommandType::TextInput => {
                self.sink
                    .type_text(&command.command, InputMethod::Clipboard)?;
                Ok(CommandOutcome::Completed { exit_code: None })
            }
        }
    }

    fn check_preconditions(&self, command: &CustomShortcutCommand) -> Result<()> {
        if !command.active_window_title_pattern.is_empty() {
            let pattern = command.active_window_title_pattern.to_lowercase();
            let matched = self
                .inspector
                .active_window_title()
                .is_some_and(|title| title.to_lowercase().contains(&pattern));
            if !matched {
                return Err(RpaError::PreconditionNotMet(format!(
                    "active window does not match '{}'",
                    command.active_window_title_pattern
                )));
            }
        }
        if !command.active_process_name_pattern.is_empty() {
            let pattern = command.active_process_name_pattern.to_lowercase();
            let matched = self
                .inspector
                .process_names()
                .iter()
                .any(|name| name.to_lowercase().contains(&pattern));
            if !matched {
                return Err(RpaError::PreconditionNotMet(format!(
                    "no running process matches '{}'",
                    command.active_process_name_pattern
                )));
            }
        }
        Ok(())
    }

    fn spawn_program(
        &self,
        mut program: Command,
        command: &CustomShortcutCommand,
    ) -> Result<CommandOutcome> {
        for parameter in &command.parameters {
            program.arg(&parameter.value);
        }
        if !command.working_directory.is_empty() {
            program.current_dir(&command.working_directory);
        }
        program.stdin(Stdio::null());

        let child = program
            .spawn()
            .map_err(|e| RpaError::SynthesisFailed(format!("spawn '{}': {e}", command.name)))?;

        if command.wait_for_completion {
            let timeout = Duration::from_secs(command.timeout_seconds as u64);
            wait_with_timeout(child, timeout, &command.name)
        } else {
            debug!(command = %command.name, "detached");
            Ok(CommandOutcome::Launched)
        }
    }
}

/// Poll the child until exit or deadline; past the deadline the child is
/// killed and the run reports `Timeout`.
fn wait_with_timeout(mut child: Child, timeout: Duration, name: &str) -> Result<CommandOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(CommandOutcome::Completed {
                    exit_code: status.code(),
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RpaError::Timeout(format!(
                        "command '{name}' exceeded {}s",
                        timeout.as_secs()
                    )));
                }
                thread::sleep(WAIT_POLL);
            }
            Err(e) => {
                return Err(RpaError::SynthesisFailed(format!("wait '{name}': {e}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyChord;
    use crate::shortcuts::CommandParameter;
    use crate::testkit::MockSink;

    struct FixedInspector {
        title: Option<String>,
        processes: Vec<String>,
    }

    impl HostInspector for FixedInspector {
        fn active_window_title(&self) -> Option<String> {
            self.title.clone()
        }
        fn process_names(&self) -> Vec<String> {
            self.processes.clone()
        }
    }

    fn runner_with(title: Option<&str>, processes: &[&str]) -> (CommandRunner, Arc<MockSink>) {
        let sink = Arc::new(MockSink::new());
        let runner = CommandRunner::new(sink.clone()).with_inspector(Arc::new(FixedInspector {
            title: title.map(str::to_string),
            processes: processes.iter().map(|s| s.to_string()).collect(),
        }));
        (runner, sink)
    }

    fn shell_command(line: &str) -> CustomShortcutCommand {
        let mut command = CustomShortcutCommand::new(
            "probe",
            KeyChord::ctrl("1"),
            CommandType::SystemCommand,
            line,
        );
        command.wait_for_completion = true;
        command.timeout_seconds = 10;
        command
    }

    #[test]
    fn disabled_command_is_skipped() {
        let (runner, _) = runner_with(None, &[]);
        let mut command = shell_command("true");
        command.enabled = false;
        assert!(matches!(
            runner.execute(&command).unwrap(),
            CommandOutcome::Skipped { .. }
        ));
    }

    #[test]
    fn window_precondition_mismatch_is_reported() {
        let (runner, _) = runner_with(Some("Notepad"), &[]);
        let mut command = shell_command("true");
        command.active_window_title_pattern = "Calculator".to_string();
        assert!(matches!(
            runner.execute(&command),
            Err(RpaError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn window_precondition_match_allows_run() {
        let (runner, _) = runner_with(Some("Untitled - Notepad"), &[]);
        let mut command = shell_command("true");
        command.active_window_title_pattern = "notepad".to_string();
        assert!(matches!(
            runner.execute(&command).unwrap(),
            CommandOutcome::Completed { exit_code: Some(0) }
        ));
    }

    #[test]
    fn process_precondition_checks_running_set() {
        let (runner, _) = runner_with(None, &["firefox", "bash"]);
        let mut command = shell_command("true");
        command.active_process_name_pattern = "FIREFOX".to_string();
        assert!(runner.execute(&command).is_ok());

        command.active_process_name_pattern = "excel".to_string();
        assert!(matches!(
            runner.execute(&command),
            Err(RpaError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn waited_command_reports_exit_code() {
        let (runner, _) = runner_with(None, &[]);
        let command = shell_command("exit 3");
        assert_eq!(
            runner.execute(&command).unwrap(),
            CommandOutcome::Completed { exit_code: Some(3) }
        );
    }

    #[test]
    fn slow_command_times_out_and_is_killed() {
        let (runner, _) = runner_with(None, &[]);
        let mut command = shell_command("sleep 30");
        command.timeout_seconds = 1;
        assert!(matches!(
            runner.execute(&command),
            Err(RpaError::Timeout(_))
        ));
    }

    #[test]
    fn parameters_become_arguments() {
        let (runner, _) = runner_with(None, &[]);
        let mut command = CustomShortcutCommand::new(
            "echo",
            KeyChord::ctrl("2"),
            CommandType::Application,
            "true",
        );
        command.parameters.push(CommandParameter {
            name: "flag".to_string(),
            value: "--version".to_string(),
        });
        command.wait_for_completion = true;
        command.timeout_seconds = 10;
        assert!(runner.execute(&command).is_ok());
    }

    #[test]
    fn text_input_goes_through_the_sink() {
        let (runner, sink) = runner_with(None, &[]);
        let command = CustomShortcutCommand::new(
            "paste",
            KeyChord::ctrl("3"),
            CommandType::TextInput,
            "boilerplate",
        );
        runner.execute(&command).unwrap();
        assert_eq!(sink.typed_texts(), vec!["boilerplate".to_string()]);
    }
}
