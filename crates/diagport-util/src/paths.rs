//! Default paths for diagport components
//!
//! Paths are user-writable by default (no root required):
//! - Socket directory: `$DIAGPORT_SOCKET_DIR`, then `$TMPDIR`, then `/tmp`
//! - Default listen socket: `<socket dir>/diagport-<pid>-<disambiguation>-socket`
//! - Config: `$XDG_CONFIG_HOME/diagport/config.toml` or `~/.config/diagport/config.toml`

use std::path::{Path, PathBuf};

/// Environment variable for overriding the socket directory
pub const DIAGPORT_SOCKET_DIR_ENV: &str = "DIAGPORT_SOCKET_DIR";

/// Environment variable for overriding the config file path
pub const DIAGPORT_CONFIG_ENV: &str = "DIAGPORT_CONFIG";

/// Prefix shared by every default listen socket
pub const SOCKET_PREFIX: &str = "diagport";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Application subdirectory name
const APP_DIR: &str = "diagport";

/// Longest socket path accepted by `sockaddr_un` (108 bytes minus the NUL)
pub const MAX_SOCKET_PATH_LEN: usize = 107;

/// Get the default socket directory.
///
/// Order of precedence:
/// 1. `$DIAGPORT_SOCKET_DIR` environment variable (if set)
/// 2. `$TMPDIR` (if set)
/// 3. `/tmp` (fallback)
pub fn default_socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DIAGPORT_SOCKET_DIR_ENV) {
        return PathBuf::from(dir);
    }

    socket_dir_without_env()
}

/// Get the socket directory without checking `DIAGPORT_SOCKET_DIR`.
pub fn socket_dir_without_env() -> PathBuf {
    match std::env::var("TMPDIR") {
        Ok(tmp) if !tmp.is_empty() => PathBuf::from(tmp),
        _ => PathBuf::from("/tmp"),
    }
}

/// File name of the default listen socket for a process.
pub fn default_socket_name(pid: u32, disambiguation: u64) -> String {
    format!("{}-{}-{}-socket", SOCKET_PREFIX, pid, disambiguation)
}

/// Full path of the default listen socket for a process inside `dir`.
pub fn default_socket_path_in(dir: &Path, pid: u32, disambiguation: u64) -> PathBuf {
    dir.join(default_socket_name(pid, disambiguation))
}

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$DIAGPORT_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/diagport/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/diagport/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(DIAGPORT_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    // Last resort
    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Whether `path` fits in a Unix socket address.
pub fn fits_socket_address(path: &Path) -> bool {
    let len = path.as_os_str().len();
    len > 0 && len <= MAX_SOCKET_PATH_LEN
}
