//! Host facade wiring settings, registry and scheduler together.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beliefstate_plugin::Event;

use crate::error::CoreError;
use crate::loader::{DylibLoader, ModuleLoader};
use crate::registry::PluginRegistry;
use crate::scheduler::{Scheduler, ShutdownHandle, TickReport};
use crate::settings::Settings;

/// Injected at the head of the first tick once every plugin is loaded.
pub const STARTUP_COMPLETE_EVENT: &str = "startup-complete";

/// Spread once after the scheduler stopped, before plugins are unloaded.
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// A configured, running beliefstate system.
#[derive(Debug)]
pub struct Beliefstate {
    scheduler: Scheduler,
    config_path: Option<PathBuf>,
}

impl Beliefstate {
    /// Load the configuration (`config` first, then the default locations)
    /// and bring up every configured plugin from its shared library.
    ///
    /// Fails when no configuration parses or a required plugin cannot be
    /// loaded; plugins loaded up to that point are torn down again.
    pub fn init(config: Option<&Path>, args: Vec<String>) -> Result<Self, CoreError> {
        let (settings, path) = Settings::load(config)?;
        let mut host = Self::from_settings(&settings, DylibLoader, args)?;
        host.config_path = Some(path);
        Ok(host)
    }

    /// Bring up the plugins named in `settings`, resolved through `loader`.
    pub fn from_settings(
        settings: &Settings,
        loader: impl ModuleLoader + 'static,
        args: Vec<String>,
    ) -> Result<Self, CoreError> {
        let mut registry = PluginRegistry::new(loader, args);
        for path in settings.search_paths() {
            registry.add_search_path(path);
        }
        registry.set_workspace_directory(settings.workspace_directory());
        registry.set_base_data_directory(settings.base_data_directory());
        registry.set_mongodb(settings.mongodb());
        registry.set_plugin_config(settings.plugin_config.clone());

        for entry in &settings.plugins.load {
            registry.load_plugin(entry.name(), entry.required())?;
        }

        let tick_interval = Duration::from_millis(settings.scheduler.tick_interval_ms);
        let mut scheduler = Scheduler::new(registry, tick_interval);
        scheduler.inject_event(Event::new(STARTUP_COMPLETE_EVENT));

        tracing::info!(
            plugins = ?scheduler.registry().plugin_names(),
            configured = settings.plugins.load.len(),
            "initialization complete"
        );
        Ok(Self {
            scheduler,
            config_path: None,
        })
    }

    /// Configuration file the system was started from, if any.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.scheduler.shutdown_handle()
    }

    pub fn registry(&self) -> &PluginRegistry {
        self.scheduler.registry()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    pub fn base_data_directory(&self) -> &Path {
        self.scheduler.registry().base_data_directory()
    }

    pub fn set_base_data_directory(&mut self, path: impl Into<PathBuf>) {
        self.scheduler.registry_mut().set_base_data_directory(path);
    }

    pub fn tick(&mut self) -> Option<TickReport> {
        self.scheduler.tick()
    }

    /// Block running ticks until the shutdown handle fires.
    pub fn run(&mut self) {
        self.scheduler.run();
    }

    /// Stop (if not already stopped), let plugins see the shutdown event,
    /// then unload everything.
    pub fn deinit(mut self) {
        self.scheduler.shutdown_handle().trigger();
        let recipients = self.scheduler.dispatch_event(Event::new(SHUTDOWN_EVENT));
        tracing::debug!(recipients, "shutdown event spread");
        self.scheduler.registry_mut().unload_all();
        tracing::info!(ticks = self.scheduler.ticks(), "beliefstate deinitialised");
    }
}
