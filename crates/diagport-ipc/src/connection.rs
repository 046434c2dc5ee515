//! Per-endpoint connection states tracked by the stream factory

use tracing::{debug, warn};

use crate::{AdvertiseMessage, ConnectionMode, ErrorCallback, IpcEndpoint, PollHandle};

/// A registered endpoint and whatever it currently owns
pub enum ConnectionState<E: IpcEndpoint> {
    Client(ClientConnection<E>),
    Server(ServerConnection<E>),
}

/// Reconnecting client endpoint with at most one cached stream
pub struct ClientConnection<E: IpcEndpoint> {
    endpoint: E,
    stream: Option<E::Stream>,
}

/// Listening endpoint; every ready event is a fresh accept
pub struct ServerConnection<E: IpcEndpoint> {
    endpoint: E,
}

impl<E: IpcEndpoint> ConnectionState<E> {
    pub fn client(endpoint: E) -> Self {
        Self::Client(ClientConnection {
            endpoint,
            stream: None,
        })
    }

    pub fn server(endpoint: E) -> Self {
        Self::Server(ServerConnection { endpoint })
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            ConnectionState::Client(_) => ConnectionMode::Client,
            ConnectionState::Server(_) => ConnectionMode::Server,
        }
    }

    pub fn name(&self) -> &str {
        self.endpoint().name()
    }

    pub fn endpoint(&self) -> &E {
        match self {
            ConnectionState::Client(c) => &c.endpoint,
            ConnectionState::Server(s) => &s.endpoint,
        }
    }

    /// Whether a client currently holds a connected stream. Always false for
    /// servers, which never cache streams.
    pub fn is_connected(&self) -> bool {
        match self {
            ConnectionState::Client(c) => c.stream.is_some(),
            ConnectionState::Server(_) => false,
        }
    }

    /// Produce the handle to poll for this endpoint.
    ///
    /// A client without a cached stream reconnects and advertises first;
    /// `None` means that failed and the endpoint sits out this round.
    pub fn poll_handle(
        &mut self,
        owner: usize,
        advertise: &AdvertiseMessage,
        callback: &mut ErrorCallback<'_>,
    ) -> Option<PollHandle<'_, E>> {
        match self {
            ConnectionState::Server(server) => Some(PollHandle::listener(&server.endpoint, owner)),
            ConnectionState::Client(client) => {
                if client.stream.is_none() {
                    client.stream = Some(client.reconnect(advertise, callback)?);
                }
                client
                    .stream
                    .as_ref()
                    .map(|stream| PollHandle::stream(stream, owner))
            }
        }
    }

    /// Hand the ready stream to the caller.
    ///
    /// Servers accept a new connection; clients give up their cached stream so
    /// the next poll handle request reconnects.
    pub fn connected_stream(&mut self, callback: &mut ErrorCallback<'_>) -> Option<E::Stream> {
        match self {
            ConnectionState::Client(client) => client.stream.take(),
            ConnectionState::Server(server) => match server.endpoint.accept() {
                Ok(stream) => {
                    debug!(name = %server.endpoint.name(), "Accepted connection");
                    Some(stream)
                }
                Err(e) => {
                    warn!(name = %server.endpoint.name(), error = %e, "Failed to accept connection");
                    callback("Failed to accept connection", e.code());
                    None
                }
            },
        }
    }

    /// The endpoint hung up. Clients drop their stream; nothing to do for a
    /// listening endpoint.
    pub fn reset(&mut self) {
        match self {
            ConnectionState::Client(client) => {
                if client.stream.take().is_some() {
                    debug!(name = %client.endpoint.name(), "Dropped hung up stream");
                }
            }
            ConnectionState::Server(_) => {}
        }
    }

    /// Release the endpoint's transport resources.
    pub fn close(&mut self, is_shutdown: bool, callback: &mut ErrorCallback<'_>) {
        let endpoint = match self {
            ConnectionState::Client(client) => {
                client.stream = None;
                &mut client.endpoint
            }
            ConnectionState::Server(server) => &mut server.endpoint,
        };

        if let Err(e) = endpoint.close(is_shutdown) {
            warn!(name = %endpoint.name(), error = %e, "Failed to close endpoint");
            callback("Failed to close connection", e.code());
        }
    }
}

impl<E: IpcEndpoint> ClientConnection<E> {
    fn reconnect(
        &mut self,
        advertise: &AdvertiseMessage,
        callback: &mut ErrorCallback<'_>,
    ) -> Option<E::Stream> {
        let mut stream = match self.endpoint.connect() {
            Ok(stream) => stream,
            Err(e) => {
                debug!(name = %self.endpoint.name(), error = %e, "Failed to connect");
                callback("Failed to connect to client connection", e.code());
                return None;
            }
        };

        if let Err(e) = advertise.send(&mut stream) {
            warn!(name = %self.endpoint.name(), error = %e, "Failed to send advertise message");
            callback(
                "Failed to send advertise message",
                e.raw_os_error().unwrap_or(-1),
            );
            return None;
        }

        debug!(name = %self.endpoint.name(), "Client connection established");
        Some(stream)
    }
}
