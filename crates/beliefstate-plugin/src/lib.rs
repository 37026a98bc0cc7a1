//! Beliefstate plugin interface
//!
//! Everything a plugin module needs to talk to the beliefstate host: the
//! [`Plugin`] capability trait, the [`Event`] / [`ServiceEvent`] messages it
//! exchanges through the host bus, its private [`ConfigTree`], the
//! [`PluginContext`] handed to every call, and the [`export_plugin!`] macro
//! generating the module's entry points.

pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod plugin;

pub use config::{ConfigTree, ConfigValue};
pub use context::{MongoDbSettings, PluginContext};
pub use error::{PluginError, PluginResult};
pub use events::{CycleResult, Event, Payload, ServiceEvent, NO_CONTENT};
pub use plugin::{
    ApiVersionFn, CreateFn, DestroyFn, Plugin, PluginBox, API_VERSION, API_VERSION_SYMBOL,
    CREATE_SYMBOL, DESTROY_SYMBOL,
};
