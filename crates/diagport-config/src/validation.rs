//! Configuration validation

use diagport_ipc::BackoffPolicy;
use diagport_util::{MAX_SOCKET_PATH_LEN, default_socket_name, fits_socket_address};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::PortSpec;
use crate::schema::{RawBackoffConfig, RawConfig};

/// Upper bound for `max_ms`; a single poll waits at most this long
pub const MAX_BACKOFF_MS: u64 = u16::MAX as u64;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Port '{name}': {message}")]
    PortError { name: String, message: String },

    #[error("Duplicate port: {0}")]
    DuplicatePort(String),

    #[error("Backoff: {0}")]
    BackoffError(String),

    #[error("Server: {0}")]
    ServerError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let ports: Vec<PortSpec> = config.ports.iter().map(PortSpec::from_raw).collect();
    errors.extend(validate_ports(&ports));
    errors.extend(validate_backoff(&config.backoff));

    if let Some(dir) = &config.server.socket_dir {
        // widest possible default socket name
        let widest = default_socket_name(u32::MAX, u64::MAX);
        if !fits_socket_address(&dir.join(widest)) {
            errors.push(ValidationError::ServerError(format!(
                "socket_dir '{}' is too long for a socket path ({} bytes max)",
                dir.display(),
                MAX_SOCKET_PATH_LEN
            )));
        }
    }

    errors
}

/// Validate a list of ports: non-empty, short enough and unique
pub fn validate_ports(ports: &[PortSpec]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for port in ports {
        if port.name.is_empty() {
            errors.push(ValidationError::PortError {
                name: port.name.clone(),
                message: "name cannot be empty".into(),
            });
            continue;
        }
        if !fits_socket_address(Path::new(&port.name)) {
            errors.push(ValidationError::PortError {
                name: port.name.clone(),
                message: format!("name exceeds {} bytes", MAX_SOCKET_PATH_LEN),
            });
        }
        if !seen.insert(port.name.as_str()) {
            errors.push(ValidationError::DuplicatePort(port.name.clone()));
        }
    }

    errors
}

fn validate_backoff(backoff: &RawBackoffConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if backoff.min_ms == Some(0) {
        errors.push(ValidationError::BackoffError("min_ms must be positive".into()));
    }

    if let Some(max) = backoff.max_ms
        && max > MAX_BACKOFF_MS
    {
        errors.push(ValidationError::BackoffError(format!(
            "max_ms {} exceeds {}",
            max, MAX_BACKOFF_MS
        )));
    }

    let min = backoff
        .min_ms
        .unwrap_or(BackoffPolicy::DEFAULT_MIN.as_millis() as u64);
    let max = backoff
        .max_ms
        .unwrap_or(BackoffPolicy::DEFAULT_MAX.as_millis() as u64);
    if max < min {
        errors.push(ValidationError::BackoffError(format!(
            "max_ms {} is below min_ms {}",
            max, min
        )));
    }

    if let Some(factor) = backoff.falloff_factor
        && !(factor >= 1.0 && factor.is_finite())
    {
        errors.push(ValidationError::BackoffError(format!(
            "falloff_factor {} must be a finite number >= 1.0",
            factor
        )));
    }

    errors
}
