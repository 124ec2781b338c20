//! # Gramdeck Device
//! Android device control for gramdeck tasks.
//!
//! - [`DeviceBridge`]: the commands a flow can send to a phone
//! - [`AdbBridge`]: bridge implementation over the `adb` CLI
//! - [`InstagramFlows`]: the scheduler's [`TaskHandler`](gramdeck_scheduler::TaskHandler)
//!   for every task kind, built on any bridge

pub mod adb;
pub mod bridge;
pub mod flows;

pub use adb::AdbBridge;
pub use bridge::{CommandOutput, DeviceBridge, DeviceInfo, KeyCode};
pub use flows::InstagramFlows;
