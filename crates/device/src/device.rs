//! Device Types
//!
//! Connected device descriptions as reported by `adb devices -l`.

/// Connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Online,
    Offline,
    Unauthorized,
    Unknown,
}

/// Physical handset or emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Physical,
    Emulator,
}

/// One connected Android device.
#[derive(Debug, Clone)]
pub struct Device {
    pub serial: String,
    pub state: DeviceState,
    pub device_type: DeviceType,
    pub model: Option<String>,
}

impl Device {
    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }

    /// Human-readable label for logs and pickers.
    pub fn label(&self) -> String {
        match &self.model {
            Some(model) => format!("{} ({})", model, self.serial),
            None => self.serial.clone(),
        }
    }
}
