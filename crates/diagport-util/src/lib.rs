//! Shared utilities for diagport
//!
//! This crate provides:
//! - Default paths for the socket directory, default listen socket and config file
//! - Process identity helpers used to name per-process sockets

mod paths;
mod process;

pub use paths::*;
pub use process::*;
