//! Gramdeck configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GramdeckError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GramdeckConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl GramdeckConfig {
    /// Load config from the default path (~/.gramdeck/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GramdeckError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GramdeckError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| GramdeckError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_tasks == 0 {
            return Err(GramdeckError::Config(
                "scheduler.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.scheduler.task_timeout_ms == 0 {
            return Err(GramdeckError::Config(
                "scheduler.task_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.device.pacing.min_delay_ms > self.device.pacing.max_delay_ms {
            return Err(GramdeckError::Config(format!(
                "device.pacing.min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.device.pacing.min_delay_ms, self.device.pacing.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Gramdeck home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gramdeck")
    }
}

fn bool_true() -> bool { true }

/// Task scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on tasks in `running` at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Delay before a failed attempt is retried.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-attempt execution timeout.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    #[serde(default = "bool_true")]
    pub enable_logging: bool,
    /// Cap on stored completed/failed records. Oldest are evicted first.
    #[serde(default)]
    pub max_terminal_tasks: Option<usize>,
}

fn default_max_concurrent() -> usize { 5 }
fn default_retry_delay_ms() -> u64 { 30_000 }
fn default_task_timeout_ms() -> u64 { 300_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            retry_delay_ms: default_retry_delay_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            enable_logging: true,
            max_terminal_tasks: None,
        }
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Device bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Serial used when a task does not name a device.
    #[serde(default)]
    pub default_device: Option<String>,
    /// Android package launched before every flow.
    #[serde(default = "default_package")]
    pub package: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Accounts in the order they appear in the in-app account switcher.
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub layout: ScreenLayout,
}

fn default_adb_path() -> String { "adb".into() }
fn default_package() -> String { "com.instagram.android".into() }
fn default_command_timeout() -> u64 { 30 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            default_device: None,
            package: default_package(),
            command_timeout_secs: default_command_timeout(),
            accounts: Vec::new(),
            pacing: PacingConfig::default(),
            layout: ScreenLayout::default(),
        }
    }
}

/// Human-like delays inserted between device interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// How long a story stays on screen before backing out.
    #[serde(default = "default_story_view")]
    pub story_view_ms: u64,
}

fn default_min_delay() -> u64 { 1_500 }
fn default_max_delay() -> u64 { 4_000 }
fn default_story_view() -> u64 { 5_000 }

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            story_view_ms: default_story_view(),
        }
    }
}

/// A screen coordinate in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Tap targets in the Instagram UI. Defaults match a 1080x2340 portrait screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenLayout {
    /// Vertical distance between rows in the account switcher sheet.
    pub account_row_height: u32,
    pub unlock_swipe_from: Point,
    pub unlock_swipe_to: Point,
    pub home_tab: Point,
    pub search_tab: Point,
    pub profile_tab: Point,
    pub search_bar: Point,
    pub first_search_result: Point,
    pub first_grid_post: Point,
    pub like_button: Point,
    pub comment_button: Point,
    pub comment_field: Point,
    pub comment_post: Point,
    pub follow_button: Point,
    pub message_button: Point,
    pub message_field: Point,
    pub message_send: Point,
    pub story_tray_first: Point,
    pub profile_avatar: Point,
    pub account_switcher: Point,
    /// Center of the first row in the account switcher sheet.
    pub account_row_first: Point,
}

impl Default for ScreenLayout {
    fn default() -> Self {
        Self {
            account_row_height: 180,
            unlock_swipe_from: Point::new(540, 1800),
            unlock_swipe_to: Point::new(540, 600),
            home_tab: Point::new(108, 2230),
            search_tab: Point::new(324, 2230),
            profile_tab: Point::new(972, 2230),
            search_bar: Point::new(540, 160),
            first_search_result: Point::new(540, 330),
            first_grid_post: Point::new(180, 700),
            like_button: Point::new(60, 1500),
            comment_button: Point::new(170, 1500),
            comment_field: Point::new(480, 2150),
            comment_post: Point::new(1000, 2150),
            follow_button: Point::new(300, 700),
            message_button: Point::new(700, 700),
            message_field: Point::new(480, 2200),
            message_send: Point::new(1000, 2200),
            story_tray_first: Point::new(160, 330),
            profile_avatar: Point::new(160, 420),
            account_switcher: Point::new(540, 160),
            account_row_first: Point::new(540, 1650),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GramdeckConfig::default();
        assert_eq!(config.scheduler.max_concurrent_tasks, 5);
        assert_eq!(config.scheduler.retry_delay(), Duration::from_secs(30));
        assert_eq!(config.scheduler.task_timeout(), Duration::from_secs(300));
        assert!(config.scheduler.enable_logging);
        assert_eq!(config.device.package, "com.instagram.android");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: GramdeckConfig = toml::from_str(
            r#"
            [scheduler]
            max_concurrent_tasks = 2

            [device]
            default_device = "emulator-5554"
            accounts = ["main", "alt"]

            [device.layout]
            like_button = { x = 70, y = 1510 }
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler.retry_delay_ms, 30_000);
        assert_eq!(config.device.default_device.as_deref(), Some("emulator-5554"));
        assert_eq!(config.device.accounts.len(), 2);
        assert_eq!(config.device.layout.like_button, Point::new(70, 1510));
        assert_eq!(config.device.layout.home_tab, Point::new(108, 2230));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = GramdeckConfig::default();
        config.scheduler.max_concurrent_tasks = 0;
        assert!(matches!(config.validate(), Err(GramdeckError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_pacing() {
        let mut config = GramdeckConfig::default();
        config.device.pacing.min_delay_ms = 5_000;
        config.device.pacing.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join("gramdeck-test-config");
        let path = dir.join("config.toml");
        let mut config = GramdeckConfig::default();
        config.scheduler.max_terminal_tasks = Some(500);
        config.save_to(&path).unwrap();

        let loaded = GramdeckConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.max_terminal_tasks, Some(500));
        std::fs::remove_dir_all(&dir).ok();
    }
}
