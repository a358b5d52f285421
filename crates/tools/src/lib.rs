//! External Packaging Tools
//!
//! Wraps the executables driving the APK pipeline (apktool, apksigner,
//! zipalign) behind typed, cancellable invocations.

pub mod apktool;
pub mod runner;
pub mod signer;
pub mod zipalign;

pub use apktool::Apktool;
pub use runner::{ToolOutput, ToolRunner};
pub use signer::{ApkSigner, KeyStore};
pub use zipalign::ZipAlign;

/// Tool invocation errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },
    #[error("tool run cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
