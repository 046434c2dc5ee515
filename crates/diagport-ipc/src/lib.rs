//! IPC layer for diagport
//!
//! Provides:
//! - Transport traits and a Unix domain socket implementation
//! - Client and server connection states with reconnect handling
//! - `IpcStreamFactory`, which multiplexes all registered connections and
//!   hands out one ready stream at a time
//! - Adaptive poll backoff for connections that are still reconnecting
//! - An in-memory mock transport for tests

mod advertise;
mod backoff;
mod connection;
mod factory;
mod mock;
mod transport;
mod unix;

pub use advertise::*;
pub use backoff::*;
pub use connection::*;
pub use factory::*;
pub use mock::*;
pub use transport::*;
pub use unix::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Poll failed: {0}")]
    Poll(#[from] nix::errno::Errno),

    #[error("Invalid endpoint name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Endpoint '{0}' is not listening")]
    NotListening(String),

    #[error("Operation not supported in {0} mode")]
    WrongMode(ConnectionMode),

    #[error("Mock transport: {0}")]
    Mock(String),
}

impl IpcError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn mock(msg: impl Into<String>) -> Self {
        Self::Mock(msg.into())
    }

    /// Code passed alongside the message to error callbacks: the OS error
    /// number when there is one, `-1` otherwise.
    pub fn code(&self) -> i32 {
        match self {
            IpcError::Io(e) => e.raw_os_error().unwrap_or(-1),
            IpcError::Poll(errno) => *errno as i32,
            _ => -1,
        }
    }
}

pub type IpcResult<T> = Result<T, IpcError>;
