//! Port list strings
//!
//! Format: `;`-separated entries of `<path>[,listen|,connect]`, for example
//! `/tmp/tool.sock,connect;/tmp/diag.sock,listen`. The mode defaults to
//! `connect` and empty entries are skipped.

use diagport_ipc::ConnectionMode;
use thiserror::Error;

use crate::PortSpec;

/// Port list parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortListError {
    #[error("Entry '{0}' has an empty path")]
    EmptyPath(String),

    #[error("Entry '{entry}' has unknown tag '{tag}'")]
    UnknownTag { entry: String, tag: String },

    #[error("Entry '{0}' sets the mode more than once")]
    ConflictingModes(String),
}

/// Parse a port list string
pub fn parse_port_list(list: &str) -> Result<Vec<PortSpec>, PortListError> {
    list.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_port_entry)
        .collect()
}

fn parse_port_entry(entry: &str) -> Result<PortSpec, PortListError> {
    let mut parts = entry.split(',').map(str::trim);
    let name = parts.next().unwrap_or_default();
    if name.is_empty() {
        return Err(PortListError::EmptyPath(entry.to_string()));
    }

    let mut mode = None;
    for tag in parts {
        let tagged = match tag.to_ascii_lowercase().as_str() {
            "listen" => ConnectionMode::Server,
            "connect" => ConnectionMode::Client,
            _ => {
                return Err(PortListError::UnknownTag {
                    entry: entry.to_string(),
                    tag: tag.to_string(),
                });
            }
        };
        if mode.replace(tagged).is_some() {
            return Err(PortListError::ConflictingModes(entry.to_string()));
        }
    }

    Ok(PortSpec::new(name, mode.unwrap_or(ConnectionMode::Client)))
}
