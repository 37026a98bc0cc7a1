//! Beliefstate host core
//!
//! Loads plugin modules into a registry, builds each plugin's private
//! configuration tree, and drives them with a single-threaded tick loop that
//! routes the events they produce through a subscription-based bus.

pub mod bus;
pub mod config_tree;
pub mod error;
pub mod host;
pub mod loader;
pub mod registry;
pub mod scheduler;
pub mod settings;

pub use bus::{BusStats, EventBus};
pub use config_tree::{build_config_tree, plugin_config_tree, PLUGIN_MARKER};
pub use error::CoreError;
pub use host::{Beliefstate, SHUTDOWN_EVENT, STARTUP_COMPLETE_EVENT};
pub use loader::{module_file_name, DylibLoader, ModuleLoader, PluginModule, StaticLoader};
pub use registry::{Delivery, PluginInfo, PluginRegistry};
pub use scheduler::{RunState, Scheduler, ShutdownHandle, TickReport};
pub use settings::{PluginEntry, Settings};

pub use beliefstate_plugin as plugin;
