//! Validated configuration structures

use diagport_ipc::{BackoffPolicy, ConnectionMode};
use diagport_util::{default_socket_dir, default_socket_path_in, process_disambiguation_key};
use std::path::PathBuf;
use std::time::Duration;

use crate::schema::{RawBackoffConfig, RawConfig, RawPort, RawPortMode, RawServerConfig};
use crate::validation::validate_ports;
use crate::{ConfigError, ConfigResult};

/// Validated configuration ready for the daemon
#[derive(Debug, Clone, Default)]
pub struct DiagportConfig {
    pub server: ServerConfig,
    pub backoff: BackoffPolicy,
    pub ports: Vec<PortSpec>,
}

impl DiagportConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            server: ServerConfig::from_raw(raw.server),
            backoff: backoff_from_raw(&raw.backoff),
            ports: raw.ports.iter().map(PortSpec::from_raw).collect(),
        }
    }

    /// Append ports from another source, such as an environment override.
    ///
    /// The merged list is validated again; on error nothing is appended.
    pub fn extend_ports(&mut self, extra: Vec<PortSpec>) -> ConfigResult<()> {
        let merged: Vec<PortSpec> = self.ports.iter().cloned().chain(extra).collect();
        let errors = validate_ports(&merged);
        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }
        self.ports = merged;
        Ok(())
    }

    /// Ports the daemon registers, default listen socket first
    pub fn effective_ports(&self) -> Vec<PortSpec> {
        self.server
            .default_listen_path()
            .map(|path| PortSpec::new(path.to_string_lossy(), ConnectionMode::Server))
            .into_iter()
            .chain(self.ports.iter().cloned())
            .collect()
    }
}

/// Default listen socket settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_listen: bool,
    pub socket_dir: PathBuf,
}

impl ServerConfig {
    fn from_raw(raw: RawServerConfig) -> Self {
        Self {
            default_listen: raw.default_listen,
            socket_dir: raw.socket_dir.unwrap_or_else(default_socket_dir),
        }
    }

    /// Path of this process's default listen socket, if enabled
    pub fn default_listen_path(&self) -> Option<PathBuf> {
        self.default_listen.then(|| {
            default_socket_path_in(
                &self.socket_dir,
                std::process::id(),
                process_disambiguation_key(),
            )
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_listen: false,
            socket_dir: default_socket_dir(),
        }
    }
}

/// One port to register with the stream factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Socket path
    pub name: String,
    pub mode: ConnectionMode,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }

    pub(crate) fn from_raw(raw: &RawPort) -> Self {
        let mode = match raw.mode {
            RawPortMode::Connect => ConnectionMode::Client,
            RawPortMode::Listen => ConnectionMode::Server,
        };
        Self::new(raw.name.clone(), mode)
    }
}

fn backoff_from_raw(raw: &RawBackoffConfig) -> BackoffPolicy {
    BackoffPolicy::new(
        raw.min_ms
            .map(Duration::from_millis)
            .unwrap_or(BackoffPolicy::DEFAULT_MIN),
        raw.max_ms
            .map(Duration::from_millis)
            .unwrap_or(BackoffPolicy::DEFAULT_MAX),
        raw.falloff_factor
            .unwrap_or(BackoffPolicy::DEFAULT_FALLOFF_FACTOR),
    )
}
