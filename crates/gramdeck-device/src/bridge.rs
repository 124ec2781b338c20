//! Device bridge — the narrow interface between task flows and a phone.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use gramdeck_core::config::Point;
use gramdeck_core::error::{GramdeckError, Result};

/// Result of one bridge command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Turn an unsuccessful command into a `Device` error naming `what`.
    pub fn check(self, what: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(GramdeckError::Device(format!(
                "{what} failed: {}",
                self.error.as_deref().unwrap_or("no error output")
            )))
        }
    }
}

/// A device as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub serial: String,
    /// `device`, `offline`, `unauthorized`, ...
    pub state: String,
}

impl DeviceInfo {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Android key codes used by the flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Back,
    Wakeup,
}

impl KeyCode {
    pub fn code(&self) -> u32 {
        match self {
            KeyCode::Back => 4,
            KeyCode::Wakeup => 224,
        }
    }
}

/// Remote control for attached devices, addressed by serial.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Bridge name for logs.
    fn name(&self) -> &str;

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Make `serial` reachable. Fails with `DeviceNotConnected` when it cannot be.
    async fn connect(&self, serial: &str) -> Result<CommandOutput>;

    async fn disconnect(&self, serial: &str) -> Result<CommandOutput>;

    async fn is_connected(&self, serial: &str) -> Result<bool> {
        Ok(self
            .list_devices()
            .await?
            .iter()
            .any(|d| d.serial == serial && d.is_online()))
    }

    async fn tap(&self, serial: &str, at: Point) -> Result<CommandOutput>;

    async fn swipe(
        &self,
        serial: &str,
        from: Point,
        to: Point,
        duration: Duration,
    ) -> Result<CommandOutput>;

    async fn type_text(&self, serial: &str, text: &str) -> Result<CommandOutput>;

    async fn key_event(&self, serial: &str, key: KeyCode) -> Result<CommandOutput>;

    async fn launch_app(&self, serial: &str, package: &str) -> Result<CommandOutput>;

    async fn open_uri(&self, serial: &str, uri: &str) -> Result<CommandOutput>;

    /// PNG bytes of the current screen.
    async fn screenshot(&self, serial: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check() {
        assert!(CommandOutput::ok("").check("tap").is_ok());
        let err = CommandOutput::failed("device offline").check("tap").unwrap_err();
        assert_eq!(err.to_string(), "Device error: tap failed: device offline");
        let err = CommandOutput::default().check("swipe").unwrap_err();
        assert!(err.to_string().contains("no error output"));
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(KeyCode::Wakeup.code(), 224);
        assert_eq!(KeyCode::Back.code(), 4);
    }

    #[test]
    fn test_online_state() {
        let online = DeviceInfo {
            serial: "emulator-5554".into(),
            state: "device".into(),
        };
        let locked = DeviceInfo {
            serial: "R58M".into(),
            state: "unauthorized".into(),
        };
        assert!(online.is_online());
        assert!(!locked.is_online());
    }
}
