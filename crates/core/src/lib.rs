//! apkforge core - project lifecycle and tool orchestration
//!
//! Tracks each open APK project through its packaging pipeline
//! (unpack, pack, sign, align, install) and keeps on-disk working state
//! and in-memory status in agreement.

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod project;
pub mod registry;

pub use config::AppConfig;
pub use error::{ApkforgeError, Result};
pub use events::{EventBus, EventSubscription, ProjectEvent};
pub use orchestrator::Orchestrator;
pub use project::{FailureContext, PackOptions, Project, Stage, Status, Toolbox};
pub use registry::ProjectRegistry;

/// apkforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "apkforge";
