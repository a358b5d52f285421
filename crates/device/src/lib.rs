//! ADB Device Bridge
//!
//! Talks to connected Android devices and emulators through the adb
//! executable: enumeration and APK installation.

pub mod adb;
pub mod device;

pub use adb::{AdbClient, AdbError};
pub use device::{Device, DeviceState, DeviceType};
