//! Host error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no valid configuration found (tried: {})", display_paths(.0))]
    ConfigNotFound(Vec<PathBuf>),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plugin module not found: {0}")]
    ModuleNotFound(String),

    #[error("failed to load module {}: {source}", .path.display())]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("module {} does not export `{symbol}`", .path.display())]
    MissingSymbol { path: PathBuf, symbol: &'static str },

    #[error("plugin {plugin}: api version {found} is incompatible with host {expected}")]
    ApiMismatch {
        plugin: String,
        found: String,
        expected: String,
    },

    #[error("plugin factory returned null: {0}")]
    NullInstance(String),

    #[error("plugin {plugin} failed to initialise: {source}")]
    InitFailed {
        plugin: String,
        #[source]
        source: beliefstate_plugin::PluginError,
    },

    #[error("plugin {plugin} panicked during {stage}")]
    Panicked { plugin: String, stage: &'static str },

    #[error("required plugin {plugin} could not be loaded: {reason}")]
    RequiredPlugin { plugin: String, reason: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
