//! Multiplexed stream factory
//!
//! Owns every registered connection and hands out the next ready stream from
//! any of them. One thread drives a factory; the shutdown flag is the only
//! piece of state other threads may observe, through a [`ShutdownToken`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::{
    AdvertiseMessage, BackoffPolicy, ConnectionMode, ConnectionState, ErrorCallback, IpcEndpoint,
    IpcTransport, PollBackoff, PollEvent,
};

/// Stream type produced by a transport's endpoints
pub type TransportStream<T> = <<T as IpcTransport>::Endpoint as IpcEndpoint>::Stream;

/// Read-only view of a factory's shutdown flag, usable from any thread
#[derive(Debug, Clone)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Registry of IPC connections and the poll loop over them
pub struct IpcStreamFactory<T: IpcTransport> {
    transport: T,
    connections: Vec<ConnectionState<T::Endpoint>>,
    shutdown: Arc<AtomicBool>,
    backoff: BackoffPolicy,
    advertise: AdvertiseMessage,
}

impl<T: IpcTransport> IpcStreamFactory<T> {
    /// Create an empty factory with the default backoff and an advertise
    /// message for the current process
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connections: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            backoff: BackoffPolicy::default(),
            advertise: AdvertiseMessage::for_current_process(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_advertise(mut self, advertise: AdvertiseMessage) -> Self {
        self.advertise = advertise;
        self
    }

    pub fn advertise(&self) -> &AdvertiseMessage {
        &self.advertise
    }

    /// Registered connections in registration order
    pub fn connections(&self) -> &[ConnectionState<T::Endpoint>] {
        &self.connections
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken(self.shutdown.clone())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Create a listening endpoint and register it.
    ///
    /// Nothing is registered if creating or listening fails.
    pub fn create_server(&mut self, name: &str, callback: &mut ErrorCallback<'_>) -> bool {
        let mut endpoint = match self.transport.create(name, ConnectionMode::Server) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(name, error = %e, "Failed to create server endpoint");
                callback("Failed to create server endpoint", e.code());
                return false;
            }
        };

        if let Err(e) = endpoint.listen() {
            warn!(name, error = %e, "Failed to listen");
            callback("Failed to listen on server endpoint", e.code());
            if let Err(e) = endpoint.close(false) {
                debug!(name, error = %e, "Failed to release endpoint after listen failure");
            }
            return false;
        }

        info!(name, "Registered server connection");
        self.connections.push(ConnectionState::server(endpoint));
        true
    }

    /// Create a client endpoint and register it. The first connect attempt
    /// happens on the next acquisition.
    pub fn create_client(&mut self, name: &str, callback: &mut ErrorCallback<'_>) -> bool {
        match self.transport.create(name, ConnectionMode::Client) {
            Ok(endpoint) => {
                info!(name, "Registered client connection");
                self.connections.push(ConnectionState::client(endpoint));
                true
            }
            Err(e) => {
                warn!(name, error = %e, "Failed to create client endpoint");
                callback("Failed to create client endpoint", e.code());
                false
            }
        }
    }

    /// True when not shut down and at least one connection is registered
    pub fn has_active_connections(&self) -> bool {
        !self.is_shutdown() && !self.connections.is_empty()
    }

    /// Close every connection without marking the factory shut down
    pub fn close_connections(&mut self, callback: &mut ErrorCallback<'_>) {
        for connection in &mut self.connections {
            connection.close(false, callback);
        }
    }

    /// Mark the factory shut down and close every connection.
    ///
    /// Only the first call does anything.
    pub fn shutdown(&mut self, callback: &mut ErrorCallback<'_>) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(connections = self.connections.len(), "Shutting down IPC connections");
        for connection in &mut self.connections {
            connection.close(true, callback);
        }
    }

    /// Block until some registered connection has a stream ready and return it.
    ///
    /// Clients that cannot reconnect are retried with a growing timeout; hung
    /// up clients are reset and retried soon. Only the first ready connection
    /// of a round is claimed, the rest stay ready for later calls. Returns
    /// `None` if the factory is shut down, has no connections, or a poll
    /// reports an error.
    pub fn get_next_available_stream(
        &mut self,
        callback: &mut ErrorCallback<'_>,
    ) -> Option<TransportStream<T>> {
        if self.is_shutdown() {
            callback("IPC stream factory is shut down", -1);
            return None;
        }
        if self.connections.is_empty() {
            callback("No IPC connections registered", -1);
            return None;
        }

        let mut backoff = PollBackoff::new(self.backoff);
        let mut poll_attempts: u32 = 0;

        loop {
            let mut all_connected = true;
            let mut handles = Vec::with_capacity(self.connections.len());
            for (index, connection) in self.connections.iter_mut().enumerate() {
                match connection.poll_handle(index, &self.advertise, callback) {
                    Some(handle) => handles.push(handle),
                    None => all_connected = false,
                }
            }

            let timeout = backoff.advance(all_connected);
            let polled = self.transport.poll(&mut handles, timeout);
            poll_attempts += 1;
            debug!(attempt = poll_attempts, timeout = %timeout, "Poll attempt");

            let events: Vec<(usize, PollEvent)> = match polled {
                Ok(0) => Vec::new(),
                Ok(_) => handles.iter().map(|h| (h.owner, h.events)).collect(),
                Err(e) => {
                    error!(attempt = poll_attempts, error = %e, "Poll failed");
                    callback("Failed to poll IPC connections", e.code());
                    return None;
                }
            };
            drop(handles);

            // An error ends the call before anything is claimed or reset
            if let Some((owner, _)) = events.iter().find(|(_, event)| *event == PollEvent::Error) {
                let name = self.connections[*owner].name();
                error!(attempt = poll_attempts, name, "Poll reported an error");
                // poll readiness carries no errno
                callback(&format!("IPC connection '{}' reported an error", name), -1);
                return None;
            }

            let mut stream = None;
            for (owner, event) in events {
                let connection = &mut self.connections[owner];
                match event {
                    PollEvent::Hangup => {
                        debug!(attempt = poll_attempts, name = connection.name(), "Connection hung up");
                        connection.reset();
                        backoff.hangup();
                    }
                    PollEvent::Signaled => {
                        if stream.is_none() {
                            stream = connection.connected_stream(callback);
                        }
                    }
                    PollEvent::None | PollEvent::Error => {}
                }
            }

            if let Some(stream) = stream {
                return Some(stream);
            }
        }
    }
}
