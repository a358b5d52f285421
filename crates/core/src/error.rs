//! Error types for apkforge
//!
//! Centralized error handling using thiserror. Tool-level failures are
//! converted into Errored-state transitions at the project boundary; the
//! variants here cover entry-operation rejections and ambient failures.

use thiserror::Error;

use apkforge_device::AdbError;
use apkforge_tools::ToolError;

/// Main error type for apkforge
#[derive(Error, Debug)]
pub enum ApkforgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool failed with code {exit_code}: {output}")]
    ToolFailed { exit_code: i32, output: String },

    #[error("Project is already unpacking")]
    AlreadyUnpacking,

    #[error("Project is not unpacked")]
    NotUnpacked,

    #[error("No device available")]
    DeviceUnavailable,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for apkforge operations
pub type Result<T> = std::result::Result<T, ApkforgeError>;

impl From<ToolError> for ApkforgeError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(tool) => ApkforgeError::ToolNotFound(tool),
            ToolError::Failed { exit_code, stderr } => ApkforgeError::ToolFailed {
                exit_code,
                output: stderr,
            },
            ToolError::Cancelled => ApkforgeError::Cancelled,
            ToolError::Io(err) => ApkforgeError::Io(err),
        }
    }
}

impl From<AdbError> for ApkforgeError {
    fn from(err: AdbError) -> Self {
        match err {
            AdbError::NotFound(tool) => ApkforgeError::ToolNotFound(tool),
            AdbError::NoDevice => ApkforgeError::DeviceUnavailable,
            AdbError::CommandFailed { exit_code, stderr } => ApkforgeError::ToolFailed {
                exit_code,
                output: stderr,
            },
            AdbError::Cancelled => ApkforgeError::Cancelled,
            AdbError::Io(err) => ApkforgeError::Io(err),
        }
    }
}
