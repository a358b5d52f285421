//! ADB Client
//!
//! Runs adb subcommands and parses their output. Only the operations the
//! packaging pipeline needs: device enumeration and install.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use apkforge_tools::{ToolError, ToolRunner};

use crate::device::{Device, DeviceState, DeviceType};

/// ADB errors
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("adb not found: {0}")]
    NotFound(String),
    #[error("no online device")]
    NoDevice,
    #[error("adb exited with code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },
    #[error("cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for AdbError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(tool) => AdbError::NotFound(tool),
            ToolError::Failed { exit_code, stderr } => {
                AdbError::CommandFailed { exit_code, stderr }
            }
            ToolError::Cancelled => AdbError::Cancelled,
            ToolError::Io(err) => AdbError::Io(err),
        }
    }
}

/// ADB client bound to one adb executable.
#[derive(Debug, Clone)]
pub struct AdbClient {
    runner: ToolRunner,
}

impl AdbClient {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            runner: ToolRunner::new(executable),
        }
    }

    pub fn is_available(&self) -> bool {
        self.runner.executable().exists()
    }

    async fn run(
        &self,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> Result<String, AdbError> {
        debug!(?args, "adb");
        let output = self.runner.run(args, None, cancel).await?;
        Ok(output.stdout)
    }

    /// List connected devices.
    pub async fn list_devices(&self, cancel: &CancellationToken) -> Result<Vec<Device>, AdbError> {
        let output = self
            .run(vec!["devices".into(), "-l".into()], cancel)
            .await?;
        Ok(parse_devices(&output))
    }

    /// Pick the first online device, failing when none responds.
    pub async fn first_online_device(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Device, AdbError> {
        let devices = self.list_devices(cancel).await?;
        devices
            .into_iter()
            .find(Device::is_online)
            .ok_or(AdbError::NoDevice)
    }

    /// Install an APK onto the device, replacing any existing install.
    pub async fn install(
        &self,
        serial: &str,
        apk: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), AdbError> {
        info!(serial, apk = %apk.display(), "installing");
        let args: Vec<OsString> = vec![
            "-s".into(),
            serial.into(),
            "install".into(),
            "-r".into(),
            apk.as_os_str().to_owned(),
        ];
        self.run(args, cancel).await?;
        Ok(())
    }
}

/// Parse the output of `adb devices -l`.
fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let serial = parts[0].to_string();
        let state = match parts[1] {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            _ => DeviceState::Unknown,
        };

        let model = parts
            .iter()
            .skip(2)
            .find_map(|part| part.strip_prefix("model:"))
            .map(str::to_string);

        let device_type = if serial.starts_with("emulator-") {
            DeviceType::Emulator
        } else {
            DeviceType::Physical
        };

        devices.push(Device {
            serial,
            state,
            device_type,
            model,
        });
    }

    devices
}
