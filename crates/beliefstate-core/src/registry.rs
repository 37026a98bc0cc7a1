//! Plugin registry: loads plugins, owns their instances and modules, and
//! keeps the subscription index.
//!
//! The registry is mutated only at startup (loading) and after the
//! scheduler stopped (unloading), never while a tick runs, so it needs no
//! locking: everything goes through `&mut self` on the scheduler thread.
//! Every call into plugin code is isolated with `catch_unwind`; a broken
//! plugin is logged and contained, it never takes the host down.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use beliefstate_plugin::{
    CycleResult, Event, MongoDbSettings, PluginBox, PluginContext, ServiceEvent,
};
use uuid::Uuid;

use crate::config_tree::plugin_config_tree;
use crate::error::CoreError;
use crate::loader::{ModuleLoader, PluginModule};

// ─── Loaded plugin entry ────────────────────────────────────────────────

/// A plugin instance together with the module it came from.
struct LoadedPlugin {
    id: Uuid,
    name: String,
    version: String,
    context: PluginContext,
    instance: Option<PluginBox>,
    module: Option<Box<dyn PluginModule>>,
}

/// What happened when a message was handed to one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The plugin consumed the message.
    Consumed,
    /// The plugin was invoked and panicked; the panic was contained.
    Panicked,
    /// No loaded plugin has that ID.
    NotLoaded,
}

impl Delivery {
    /// Whether the plugin's consume hook ran at all.
    pub fn invoked(self) -> bool {
        !matches!(self, Delivery::NotLoaded)
    }
}

impl From<Option<()>> for Delivery {
    fn from(guarded: Option<()>) -> Self {
        match guarded {
            Some(()) => Delivery::Consumed,
            None => Delivery::Panicked,
        }
    }
}

impl LoadedPlugin {
    fn deinit(&mut self) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        let ctx = &mut self.context;
        match guarded(&self.name, "deinit", || instance.deinit(ctx)) {
            Some(Ok(())) => tracing::debug!(plugin = %self.name, "plugin deinitialised"),
            Some(Err(e)) => tracing::warn!(plugin = %self.name, "deinit failed: {e}"),
            None => {}
        }
    }

    /// Hand the instance back to its module's destructor. Pending outbox
    /// messages go first: their payloads may point into the module's code.
    fn destroy_instance(&mut self) {
        drop(self.context.drain_deployed());
        let Some(instance) = self.instance.take() else {
            return;
        };
        match &self.module {
            Some(module) => {
                guarded(&self.name, "destroy", || module.destroy(instance));
            }
            None => drop(instance),
        }
    }

    fn unload_module(&mut self) {
        if let Some(module) = self.module.take() {
            let path = module.path().to_path_buf();
            drop(module);
            tracing::debug!(plugin = %self.name, path = %path.display(), "plugin module unloaded");
        }
    }

    fn cycle(&mut self) -> CycleResult {
        let Some(instance) = self.instance.as_mut() else {
            return CycleResult::failed();
        };
        let ctx = &mut self.context;
        let produced = guarded(&self.name, "cycle", || instance.cycle(ctx))
            .unwrap_or_else(CycleResult::failed);
        if !produced.success {
            tracing::warn!(
                plugin = %self.name,
                events = produced.events.len(),
                service_events = produced.service_events.len(),
                "plugin cycle reported failure, dispatching its output anyway"
            );
        }

        // messages deployed since the last tick precede this cycle's output
        let mut result = self.context.drain_deployed();
        result.merge(produced);
        result
    }

    fn consume_event(&mut self, event: &Event) -> Delivery {
        let Some(instance) = self.instance.as_mut() else {
            return Delivery::NotLoaded;
        };
        let ctx = &mut self.context;
        let delivery: Delivery =
            guarded(&self.name, "consume_event", || instance.consume_event(ctx, event)).into();
        if delivery == Delivery::Panicked {
            tracing::warn!(plugin = %self.name, event = %event.name, "event delivery aborted by panic");
        }
        delivery
    }

    fn consume_service_event(&mut self, event: &ServiceEvent) -> Delivery {
        let Some(instance) = self.instance.as_mut() else {
            return Delivery::NotLoaded;
        };
        let ctx = &mut self.context;
        let delivery: Delivery = guarded(&self.name, "consume_service_event", || {
            instance.consume_service_event(ctx, event)
        })
        .into();
        if delivery == Delivery::Panicked {
            tracing::warn!(
                plugin = %self.name,
                service = %event.service_name,
                "service event delivery aborted by panic"
            );
        }
        delivery
    }
}

impl Drop for LoadedPlugin {
    fn drop(&mut self) {
        // normally already done by the registry, in phase order
        self.destroy_instance();
        self.unload_module();
    }
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub module_path: Option<PathBuf>,
    pub subscribed_events: BTreeSet<String>,
    pub subscribed_services: BTreeSet<String>,
}

// ─── Registry ───────────────────────────────────────────────────────────

/// Owns every loaded plugin, in load order, and indexes their subscriptions.
pub struct PluginRegistry {
    /// Loaded plugins indexed by registry ID.
    plugins: HashMap<Uuid, LoadedPlugin>,
    /// Registry IDs in load order; cycle and delivery order follow it.
    load_order: Vec<Uuid>,
    /// Plugin name → registry ID.
    names: HashMap<String, Uuid>,
    /// Event name → subscribed plugin IDs (in load order).
    event_subscriptions: HashMap<String, Vec<Uuid>>,
    /// Service name → serving plugin IDs (in load order).
    service_subscriptions: HashMap<String, Vec<Uuid>>,
    /// Directories consulted, in order, when resolving a plugin name.
    search_paths: Vec<PathBuf>,
    loader: Box<dyn ModuleLoader>,
    /// Process arguments handed to every plugin's `init`.
    args: Vec<String>,
    /// Raw `plugin-config` section.
    plugin_config: Option<toml::Value>,
    base_data_directory: PathBuf,
    workspace_directory: PathBuf,
    mongodb: Option<MongoDbSettings>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_names())
            .field("search_paths", &self.search_paths)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    /// Create an empty registry using `loader` to resolve plugin modules.
    pub fn new(loader: impl ModuleLoader + 'static, args: Vec<String>) -> Self {
        Self {
            plugins: HashMap::new(),
            load_order: Vec::new(),
            names: HashMap::new(),
            event_subscriptions: HashMap::new(),
            service_subscriptions: HashMap::new(),
            search_paths: Vec::new(),
            loader: Box::new(loader),
            args,
            plugin_config: None,
            base_data_directory: PathBuf::new(),
            workspace_directory: PathBuf::new(),
            mongodb: None,
        }
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Append a directory to the module search paths.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!(path = %path.display(), "plugin search path added");
        self.search_paths.push(path);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Raw `plugin-config` section used to build each plugin's private tree.
    pub fn set_plugin_config(&mut self, section: Option<toml::Value>) {
        self.plugin_config = section;
    }

    pub fn set_workspace_directory(&mut self, path: impl Into<PathBuf>) {
        self.workspace_directory = path.into();
    }

    pub fn set_mongodb(&mut self, mongodb: Option<MongoDbSettings>) {
        self.mongodb = mongodb;
    }

    /// Propagate the storage root to every loaded plugin and remember it
    /// for plugins loaded later.
    pub fn set_base_data_directory(&mut self, path: impl Into<PathBuf>) {
        self.base_data_directory = path.into();
        for plugin in self.plugins.values_mut() {
            plugin
                .context
                .set_base_data_directory(self.base_data_directory.clone());
        }
        tracing::info!(
            path = %self.base_data_directory.display(),
            plugins = self.plugins.len(),
            "base data directory set"
        );
    }

    pub fn base_data_directory(&self) -> &Path {
        &self.base_data_directory
    }

    // ── Loading ──────────────────────────────────────────────────────

    /// Load, instantiate and initialise the plugin `name`.
    ///
    /// Returns `Ok(true)` when the plugin is (or already was) loaded,
    /// `Ok(false)` when an optional plugin failed and was skipped, and
    /// `Err(RequiredPlugin)` when a required one failed.
    pub fn load_plugin(&mut self, name: &str, required: bool) -> Result<bool, CoreError> {
        match self.try_load(name) {
            Ok(_) => Ok(true),
            Err(e) if required => {
                tracing::error!(plugin = %name, "failed to load required plugin: {e}");
                Err(CoreError::RequiredPlugin {
                    plugin: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                tracing::warn!(plugin = %name, "failed to load optional plugin, skipping: {e}");
                Ok(false)
            }
        }
    }

    fn try_load(&mut self, name: &str) -> Result<Uuid, CoreError> {
        if let Some(id) = self.names.get(name) {
            tracing::warn!(plugin = %name, "plugin already loaded, ignoring");
            return Ok(*id);
        }

        let path = self
            .loader
            .locate(name, &self.search_paths)
            .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;

        let loader = &self.loader;
        let module = guarded(name, "module load", || loader.load(name, &path))
            .ok_or_else(|| panicked(name, "module load"))??;
        let mut instance = guarded(name, "instantiation", || module.create())
            .ok_or_else(|| panicked(name, "instantiation"))??;

        let config = plugin_config_tree(self.plugin_config.as_ref(), name);
        tracing::debug!(plugin = %name, config = %config.to_json(), "plugin configuration built");

        let mut context = PluginContext::new(name, config)
            .with_base_data_directory(self.base_data_directory.clone())
            .with_workspace_directory(self.workspace_directory.clone())
            .with_mongodb(self.mongodb.clone());

        let args = &self.args;
        let failure = match guarded(name, "init", || instance.init(&mut context, args)) {
            Some(Ok(())) => None,
            Some(Err(source)) => Some(CoreError::InitFailed {
                plugin: name.to_string(),
                source,
            }),
            None => Some(panicked(name, "init")),
        };
        context.seal();

        let version = instance.version().to_string();
        let id = Uuid::new_v4();
        let loaded = LoadedPlugin {
            id,
            name: name.to_string(),
            version,
            context,
            instance: Some(instance),
            module: Some(module),
        };

        if let Some(e) = failure {
            // dropping the entry destroys the instance, then unloads the module
            drop(loaded);
            return Err(e);
        }

        self.register(loaded, &path);
        Ok(id)
    }

    fn register(&mut self, loaded: LoadedPlugin, path: &Path) {
        let id = loaded.id;
        for event in loaded.context.subscribed_events() {
            self.event_subscriptions
                .entry(event.clone())
                .or_default()
                .push(id);
        }
        for service in loaded.context.subscribed_services() {
            self.service_subscriptions
                .entry(service.clone())
                .or_default()
                .push(id);
        }

        tracing::info!(
            plugin = %loaded.name,
            plugin_id = %id,
            version = %loaded.version,
            path = %path.display(),
            events = ?loaded.context.subscribed_events(),
            services = ?loaded.context.subscribed_services(),
            "plugin loaded"
        );

        self.names.insert(loaded.name.clone(), id);
        self.load_order.push(id);
        self.plugins.insert(id, loaded);
    }

    // ── Unloading ────────────────────────────────────────────────────

    /// Deinit, destroy and unload one plugin. Unknown names are a no-op
    /// returning `false`.
    pub fn unload_plugin(&mut self, name: &str) -> bool {
        let Some(id) = self.names.remove(name) else {
            tracing::debug!(plugin = %name, "unload requested for plugin that is not loaded");
            return false;
        };
        self.load_order.retain(|other| *other != id);
        for subscribers in self
            .event_subscriptions
            .values_mut()
            .chain(self.service_subscriptions.values_mut())
        {
            subscribers.retain(|other| *other != id);
        }
        self.event_subscriptions.retain(|_, subs| !subs.is_empty());
        self.service_subscriptions.retain(|_, subs| !subs.is_empty());

        if let Some(mut plugin) = self.plugins.remove(&id) {
            plugin.deinit();
            plugin.destroy_instance();
            plugin.unload_module();
        }
        tracing::info!(plugin = %name, plugin_id = %id, "plugin unloaded");
        true
    }

    /// Tear everything down: deinit every plugin, then destroy every
    /// instance, then unload every module, each phase in load order.
    pub fn unload_all(&mut self) {
        if self.load_order.is_empty() {
            return;
        }
        let order = std::mem::take(&mut self.load_order);
        tracing::info!(plugins = order.len(), "unloading all plugins");

        for id in &order {
            if let Some(plugin) = self.plugins.get_mut(id) {
                plugin.deinit();
            }
        }
        for id in &order {
            if let Some(plugin) = self.plugins.get_mut(id) {
                plugin.destroy_instance();
            }
        }
        for id in &order {
            if let Some(mut plugin) = self.plugins.remove(id) {
                plugin.unload_module();
            }
        }

        self.plugins.clear();
        self.names.clear();
        self.event_subscriptions.clear();
        self.service_subscriptions.clear();
    }

    // ── Cycle & delivery ─────────────────────────────────────────────

    /// Cycle every plugin in load order and concatenate their output.
    /// The aggregate succeeds only if every plugin did.
    pub fn cycle_all(&mut self) -> CycleResult {
        let mut total = CycleResult::ok();
        for id in &self.load_order {
            if let Some(plugin) = self.plugins.get_mut(id) {
                total.merge(plugin.cycle());
            }
        }
        total
    }

    /// Plugins subscribed to the event `name`, in load order.
    pub fn event_subscribers(&self, name: &str) -> &[Uuid] {
        self.event_subscriptions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Plugins serving the service `name`, in load order.
    pub fn service_subscribers(&self, name: &str) -> &[Uuid] {
        self.service_subscriptions
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Hand `event` to plugin `id`.
    pub fn deliver_event(&mut self, id: Uuid, event: &Event) -> Delivery {
        self.plugins
            .get_mut(&id)
            .map_or(Delivery::NotLoaded, |plugin| plugin.consume_event(event))
    }

    /// Hand `event` to plugin `id`.
    pub fn deliver_service_event(&mut self, id: Uuid, event: &ServiceEvent) -> Delivery {
        self.plugins
            .get_mut(&id)
            .map_or(Delivery::NotLoaded, |plugin| plugin.consume_service_event(event))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.load_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.load_order.is_empty()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Loaded plugin names in load order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.load_order
            .iter()
            .filter_map(|id| self.plugins.get(id))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn version_of(&self, name: &str) -> Option<&str> {
        let id = self.names.get(name)?;
        self.plugins.get(id).map(|p| p.version.as_str())
    }

    pub fn name_of(&self, id: Uuid) -> Option<&str> {
        self.plugins.get(&id).map(|p| p.name.as_str())
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        let plugin = self.plugins.get(self.names.get(name)?)?;
        Some(PluginInfo {
            id: plugin.id,
            name: plugin.name.clone(),
            version: plugin.version.clone(),
            module_path: plugin.module.as_ref().map(|m| m.path().to_path_buf()),
            subscribed_events: plugin.context.subscribed_events().clone(),
            subscribed_services: plugin.context.subscribed_services().clone(),
        })
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.unload_all();
    }
}

/// Run plugin code, containing any panic. A panic is logged and yields
/// `None`.
fn guarded<T>(plugin: &str, stage: &'static str, call: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(panic) => {
            tracing::error!(plugin = %plugin, stage, panic = panic_message(&*panic), "plugin panicked");
            None
        }
    }
}

fn panicked(plugin: &str, stage: &'static str) -> CoreError {
    CoreError::Panicked {
        plugin: plugin.to_string(),
        stage,
    }
}

/// Human-readable message of a caught panic.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
