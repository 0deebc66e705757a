//! Shotline Common Library
//!
//! Shared types, job configuration and file naming rules for the shotline
//! visual regression engine and its front ends.

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

// Re-export commonly used types
pub use config::{BrowserType, Cookie, HttpCheckConfig, JobConfig, UrlConfig};
pub use error::{Error, Result};
pub use types::*;

/// Shotline version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
