//! Gramdeck error types.

use std::time::Duration;

/// Errors produced anywhere in the Gramdeck stack.
#[derive(Debug, thiserror::Error)]
pub enum GramdeckError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("No handler registered for task kind '{0}'")]
    UnsupportedTask(String),

    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, GramdeckError>;
