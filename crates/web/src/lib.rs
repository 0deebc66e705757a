//! Shotline HTTP API
//!
//! Starts runs from posted job configurations and serves their status and
//! results while they execute.

pub mod server;

pub use server::{WebServer, WebServerConfig};
