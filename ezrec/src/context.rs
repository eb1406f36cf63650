//! Application context: owns the clock, storage and sink, and wires the
//! scheduler, hotkey dispatcher and command runner together at
//! construction. There are no process-wide singletons; everything that
//! needs a collaborator is handed one here.

use crate::clock::{Clock, SystemClock};
use crate::commands::CommandRunner;
use crate::errors::Result;
use crate::hotkeys::HotkeyDispatcher;
use crate::keys::KeyChord;
use crate::schedule::TriggerCondition;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::shortcuts::ShortcutSettings;
use crate::sink::{InputSink, SystemSink};
use crate::storage::{Storage, StorageConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Settings key under which the shortcut configuration persists.
const SHORTCUT_SETTINGS_KEY: &str = "shortcut_settings";

pub struct RpaContext {
    pub clock: Arc<dyn Clock>,
    pub storage: Storage,
    pub sink: Arc<dyn InputSink>,
    pub scheduler: Arc<Scheduler>,
    pub hotkeys: Arc<HotkeyDispatcher>,
    pub commands: Arc<CommandRunner>,
    pub shortcut_settings: ShortcutSettings,
}

impl RpaContext {
    pub fn new(storage_config: StorageConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sink: Arc<dyn InputSink> = Arc::new(SystemSink::new());
        Self::with_parts(storage_config, clock, sink, SchedulerConfig::default())
    }

    /// Construction seam for tests and embedders: any clock, any sink.
    pub fn with_parts(
        storage_config: StorageConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn InputSink>,
        scheduler_config: SchedulerConfig,
    ) -> Result<Self> {
        let storage = Storage::open(storage_config)?;
        let shortcut_settings = load_shortcut_settings(&storage);
        let scheduler = Scheduler::new(
            storage.clone(),
            Arc::clone(&sink),
            Arc::clone(&clock),
            scheduler_config,
        );
        let commands = Arc::new(CommandRunner::new(Arc::clone(&sink)));
        Ok(Self {
            clock,
            storage,
            sink,
            scheduler,
            hotkeys: Arc::new(HotkeyDispatcher::new()),
            commands,
            shortcut_settings,
        })
    }

    /// Bind the configured custom commands and hotkey-triggered schedules
    /// into the dispatcher registry.
    pub fn register_shortcuts(&self) -> Result<()> {
        for command in &self.shortcut_settings.custom_commands {
            let runner = Arc::clone(&self.commands);
            let bound = command.clone();
            if let Err(e) = self.hotkeys.register(&command.chord, move || {
                runner.execute(&bound).map(|_| ())
            }) {
                warn!(chord = %command.chord, "cannot bind custom command: {e}");
            }
        }

        for schedule in self.storage.list_schedules()? {
            if let TriggerCondition::Hotkey { chord } = &schedule.trigger {
                let chord = KeyChord::parse(chord)?;
                let scheduler = Arc::clone(&self.scheduler);
                let schedule_id = schedule.schedule_id;
                if let Err(e) = self.hotkeys.register(&chord, move || {
                    scheduler.notify(schedule_id);
                    Ok(())
                }) {
                    warn!(chord = %chord, "cannot bind schedule hotkey: {e}");
                }
            }
        }
        Ok(())
    }

    /// Start the background services: scheduler loop, file watchers and
    /// the global hotkey listener.
    pub fn start(&self) -> Result<std::thread::JoinHandle<()>> {
        self.scheduler.start_file_watchers()?;
        self.hotkeys.start()?;
        let handle = self.scheduler.start();
        info!("rpa context started");
        Ok(handle)
    }

    pub fn shutdown(&self) {
        self.hotkeys.stop();
        self.scheduler.shutdown();
        info!("rpa context stopped");
    }

    /// Persist the current shortcut settings snapshot.
    pub fn save_shortcut_settings(&self, settings: &ShortcutSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.storage.set_setting(SHORTCUT_SETTINGS_KEY, &json)
    }
}

fn load_shortcut_settings(storage: &Storage) -> ShortcutSettings {
    match storage.get_setting(SHORTCUT_SETTINGS_KEY) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("shortcut settings unreadable, using defaults: {e}");
            ShortcutSettings::default()
        }),
        _ => ShortcutSettings::default(),
    }
}
