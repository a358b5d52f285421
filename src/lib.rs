//! apkforge - APK packaging workbench
//!
//! Opens APKs as projects and drives them through the external-tool
//! pipeline: unpack, edit, repack, sign, align, install.

pub use apkforge_core as core;
pub use apkforge_device as device;
pub use apkforge_tools as tools;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "apkforge";
