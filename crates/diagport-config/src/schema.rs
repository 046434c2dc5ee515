//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Default listen port settings
    #[serde(default)]
    pub server: RawServerConfig,

    /// Poll backoff tuning
    #[serde(default)]
    pub backoff: RawBackoffConfig,

    /// Explicitly configured ports
    #[serde(default)]
    pub ports: Vec<RawPort>,
}

/// Default listen port settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Register a per-process listen socket in `socket_dir`
    #[serde(default)]
    pub default_listen: bool,

    /// Directory for the default listen socket (default: `$TMPDIR` or `/tmp`)
    pub socket_dir: Option<PathBuf>,
}

/// Poll backoff tuning; unset fields use the built-in defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBackoffConfig {
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub falloff_factor: Option<f64>,
}

/// One configured port
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawPort {
    /// Socket path
    pub name: String,

    #[serde(default)]
    pub mode: RawPortMode,
}

/// Whether the port connects out or listens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPortMode {
    #[default]
    Connect,
    Listen,
}
