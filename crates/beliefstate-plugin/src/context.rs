//! Per-plugin host context.
//!
//! The host creates one [`PluginContext`] per loaded plugin and passes it to
//! every lifecycle call. It carries the plugin's identity, its private
//! configuration, the shared storage settings, the subscriptions declared
//! during `init` and an outbox for messages deployed outside of `cycle`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigTree;
use crate::events::{CycleResult, Event, ServiceEvent};

// ─── Shared settings ────────────────────────────────────────────────────

/// Remote document database settings shared with every plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoDbSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
}

// ─── Context ────────────────────────────────────────────────────────────

/// Host-side state of one plugin, handed to every call into it.
#[derive(Debug)]
pub struct PluginContext {
    name: String,
    config: ConfigTree,
    base_data_directory: PathBuf,
    workspace_directory: PathBuf,
    mongodb: Option<MongoDbSettings>,
    subscribed_events: BTreeSet<String>,
    subscribed_services: BTreeSet<String>,
    sealed: bool,
    outbox: CycleResult,
}

impl PluginContext {
    pub fn new(name: impl Into<String>, config: ConfigTree) -> Self {
        Self {
            name: name.into(),
            config,
            base_data_directory: PathBuf::new(),
            workspace_directory: PathBuf::new(),
            mongodb: None,
            subscribed_events: BTreeSet::new(),
            subscribed_services: BTreeSet::new(),
            sealed: false,
            outbox: CycleResult::ok(),
        }
    }

    pub fn with_base_data_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_data_directory = path.into();
        self
    }

    pub fn with_workspace_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_directory = path.into();
        self
    }

    pub fn with_mongodb(mut self, mongodb: Option<MongoDbSettings>) -> Self {
        self.mongodb = mongodb;
        self
    }

    // ── Identity and settings ─────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    /// This plugin's private configuration tree.
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Root directory for persistent data, shared by all plugins.
    pub fn base_data_directory(&self) -> &Path {
        &self.base_data_directory
    }

    /// Host-side: propagate a new storage root.
    pub fn set_base_data_directory(&mut self, path: impl Into<PathBuf>) {
        self.base_data_directory = path.into();
    }

    pub fn workspace_directory(&self) -> &Path {
        &self.workspace_directory
    }

    pub fn mongodb(&self) -> Option<&MongoDbSettings> {
        self.mongodb.as_ref()
    }

    // ── Subscriptions ─────────────────────────────────────────────────

    /// Declare interest in events called `name`. Only honoured during `init`.
    pub fn subscribe_event(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.sealed {
            tracing::warn!(
                plugin = %self.name,
                event = %name,
                "event subscription after init ignored"
            );
            return false;
        }
        self.subscribed_events.insert(name)
    }

    /// Declare that this plugin serves the service called `name`.
    /// Only honoured during `init`.
    pub fn subscribe_service(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.sealed {
            tracing::warn!(
                plugin = %self.name,
                service = %name,
                "service subscription after init ignored"
            );
            return false;
        }
        self.subscribed_services.insert(name)
    }

    pub fn subscribed_events(&self) -> &BTreeSet<String> {
        &self.subscribed_events
    }

    pub fn subscribed_services(&self) -> &BTreeSet<String> {
        &self.subscribed_services
    }

    pub fn is_subscribed_to_event(&self, name: &str) -> bool {
        self.subscribed_events.contains(name)
    }

    pub fn is_subscribed_to_service(&self, name: &str) -> bool {
        self.subscribed_services.contains(name)
    }

    /// Host-side: freeze the subscription sets once `init` returned.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    // ── Outbox ────────────────────────────────────────────────────────

    /// Queue an event; it is dispatched after this plugin's next cycle.
    pub fn deploy_event(&mut self, event: Event) {
        self.outbox.push_event(event);
    }

    /// Queue a service event; it is dispatched after this plugin's next cycle.
    pub fn deploy_service_event(&mut self, event: ServiceEvent) {
        self.outbox.push_service_event(event);
    }

    pub fn pending(&self) -> usize {
        self.outbox.events.len() + self.outbox.service_events.len()
    }

    /// Host-side: take everything deployed since the last drain.
    pub fn drain_deployed(&mut self) -> CycleResult {
        std::mem::take(&mut self.outbox)
    }

    // ── Logging ───────────────────────────────────────────────────────

    pub fn debug(&self, message: &str) {
        tracing::debug!(plugin = %self.name, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.name, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.name, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.name, "{message}");
    }
}
