//! Errors a plugin reports back to the host.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("init failed: {0}")]
    Init(String),

    #[error("deinit failed: {0}")]
    Deinit(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type PluginResult<T> = Result<T, PluginError>;
