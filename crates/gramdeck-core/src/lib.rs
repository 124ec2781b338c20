//! # Gramdeck Core
//!
//! Shared building blocks for the Gramdeck workspace: the error type used by
//! every crate and the TOML configuration tree.

pub mod config;
pub mod error;

pub use config::GramdeckConfig;
pub use error::{GramdeckError, Result};
