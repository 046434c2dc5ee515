//! Transport interfaces consumed by the stream factory

use std::fmt;
use std::io::Write;

use crate::{IpcResult, PollTimeout};

/// Diagnostic callback invoked at the point of failure with a message and an
/// error code. It has no control-flow meaning.
pub type ErrorCallback<'a> = dyn FnMut(&str, i32) + 'a;

/// Role of an endpoint, fixed when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    /// Connects out to a peer that is listening
    Client,
    /// Listens for and accepts incoming connections
    Server,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Client => write!(f, "client"),
            ConnectionMode::Server => write!(f, "server"),
        }
    }
}

/// Readiness reported by a poll for a single handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollEvent {
    /// Nothing happened on this handle
    #[default]
    None,
    /// Data (or an incoming connection) is ready
    Signaled,
    /// The peer closed the channel
    Hangup,
    /// The handle is broken
    Error,
}

/// The resource a poll handle waits on
pub enum PollTarget<'a, E: IpcEndpoint> {
    /// A listening endpoint; ready means a connection is pending
    Listener(&'a E),
    /// A connected stream; ready means data is pending
    Stream(&'a E::Stream),
}

impl<E: IpcEndpoint> Clone for PollTarget<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: IpcEndpoint> Copy for PollTarget<'_, E> {}

/// One entry of the set handed to [`IpcTransport::poll`].
///
/// Handles borrow from the connections that produced them and only live for a
/// single poll round.
pub struct PollHandle<'a, E: IpcEndpoint> {
    pub target: PollTarget<'a, E>,
    /// Filled in by the transport's poll
    pub events: PollEvent,
    /// Index of the owning connection in the factory's registry
    pub owner: usize,
}

impl<'a, E: IpcEndpoint> PollHandle<'a, E> {
    pub fn listener(endpoint: &'a E, owner: usize) -> Self {
        Self {
            target: PollTarget::Listener(endpoint),
            events: PollEvent::None,
            owner,
        }
    }

    pub fn stream(stream: &'a E::Stream, owner: usize) -> Self {
        Self {
            target: PollTarget::Stream(stream),
            events: PollEvent::None,
            owner,
        }
    }
}

/// A single named IPC endpoint in client or server mode
pub trait IpcEndpoint: Send {
    /// A connected bidirectional byte stream
    type Stream: Write + Send;

    /// Name identifying the IPC channel
    fn name(&self) -> &str;

    /// Mode the endpoint was created in
    fn mode(&self) -> ConnectionMode;

    /// Start listening (server mode only)
    fn listen(&mut self) -> IpcResult<()>;

    /// Open a new connection to the peer (client mode only)
    fn connect(&mut self) -> IpcResult<Self::Stream>;

    /// Accept one pending connection (server mode only)
    fn accept(&mut self) -> IpcResult<Self::Stream>;

    /// Release the endpoint's OS resources. Closing twice is a no-op.
    fn close(&mut self, is_shutdown: bool) -> IpcResult<()>;
}

/// Creates endpoints and waits on several of them at once
pub trait IpcTransport: Send {
    type Endpoint: IpcEndpoint;

    /// Construct an endpoint. Client endpoints do not connect yet.
    fn create(&self, name: &str, mode: ConnectionMode) -> IpcResult<Self::Endpoint>;

    /// Wait until at least one handle is ready or the timeout elapses.
    ///
    /// Sets `events` on every handle and returns how many handles have an
    /// event other than [`PollEvent::None`].
    fn poll(
        &self,
        handles: &mut [PollHandle<'_, Self::Endpoint>],
        timeout: PollTimeout,
    ) -> IpcResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_display() {
        assert_eq!(ConnectionMode::Client.to_string(), "client");
        assert_eq!(ConnectionMode::Server.to_string(), "server");
    }

    #[test]
    fn poll_event_defaults_to_none() {
        assert_eq!(PollEvent::default(), PollEvent::None);
    }
}
