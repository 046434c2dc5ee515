//! In-memory transport for unit and integration testing
//!
//! Every endpoint name maps to a simulated peer. Tests flip peer state
//! directly or queue actions that are applied at the start of a later poll
//! round, and can inspect every poll timeout, connect attempt, close call and
//! byte written.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    ConnectionMode, IpcEndpoint, IpcError, IpcResult, IpcTransport, PollEvent, PollHandle,
    PollTarget, PollTimeout,
};

/// A change to the simulated world
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockAction {
    /// The peer a client endpoint connects to starts or stops listening
    PeerListening { name: String, listening: bool },
    /// A connection request arrives at a server endpoint
    IncomingConnection(String),
    /// The client's current stream has data to read
    Readable(String),
    /// The peer of the client's current stream closes it
    HangUp(String),
    /// The endpoint (listener or current stream) reports an error
    Break(String),
    /// The poll call itself fails
    FailPoll,
}

#[derive(Debug, Default)]
struct MockPeer {
    listening: bool,
    pending: usize,
    broken: bool,
    current: Option<u64>,
    connects: usize,
    accepts: usize,
    fail_advertise: bool,
}

#[derive(Debug, Default)]
struct MockStreamState {
    name: String,
    written: Vec<u8>,
    readable: bool,
    hung_up: bool,
    broken: bool,
    dropped: bool,
}

#[derive(Default)]
struct MockState {
    peers: HashMap<String, MockPeer>,
    streams: HashMap<u64, MockStreamState>,
    next_stream_id: u64,
    polls: Vec<PollTimeout>,
    script: VecDeque<Vec<MockAction>>,
    fail_poll: bool,
    fail_create: HashSet<String>,
    fail_listen: HashSet<String>,
    closes: Vec<(String, bool)>,
}

impl MockState {
    fn peer(&mut self, name: &str) -> &mut MockPeer {
        self.peers.entry(name.to_string()).or_default()
    }

    fn current_stream(&mut self, name: &str) -> Option<&mut MockStreamState> {
        let id = self.peers.get(name)?.current?;
        self.streams.get_mut(&id).filter(|s| !s.dropped)
    }

    fn new_stream(&mut self, name: &str) -> u64 {
        self.next_stream_id += 1;
        let id = self.next_stream_id;
        self.streams.insert(
            id,
            MockStreamState {
                name: name.to_string(),
                ..Default::default()
            },
        );
        id
    }

    fn apply(&mut self, action: MockAction) {
        match action {
            MockAction::PeerListening { name, listening } => self.peer(&name).listening = listening,
            MockAction::IncomingConnection(name) => self.peer(&name).pending += 1,
            MockAction::Readable(name) => {
                if let Some(stream) = self.current_stream(&name) {
                    stream.readable = true;
                }
            }
            MockAction::HangUp(name) => {
                if let Some(stream) = self.current_stream(&name) {
                    stream.hung_up = true;
                }
            }
            MockAction::Break(name) => {
                if let Some(stream) = self.current_stream(&name) {
                    stream.broken = true;
                } else {
                    self.peer(&name).broken = true;
                }
            }
            MockAction::FailPoll => self.fail_poll = true,
        }
    }

    fn classify(&self, target: PollTarget<'_, MockEndpoint>) -> PollEvent {
        match target {
            PollTarget::Listener(endpoint) => {
                let peer = self.peers.get(&endpoint.name);
                if endpoint.closed || peer.is_some_and(|p| p.broken) {
                    PollEvent::Error
                } else if peer.is_some_and(|p| p.pending > 0) {
                    PollEvent::Signaled
                } else {
                    PollEvent::None
                }
            }
            PollTarget::Stream(stream) => match self.streams.get(&stream.id) {
                Some(s) if s.broken => PollEvent::Error,
                Some(s) if s.hung_up => PollEvent::Hangup,
                Some(s) if s.readable => PollEvent::Signaled,
                Some(_) => PollEvent::None,
                None => PollEvent::Error,
            },
        }
    }
}

/// Mock transport shared between the factory under test and the test body
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an action immediately
    pub fn apply(&self, action: MockAction) {
        self.lock().apply(action);
    }

    /// Queue actions applied at the start of a later poll call. Each call to
    /// poll consumes one queued round.
    pub fn queue_round(&self, actions: Vec<MockAction>) {
        self.lock().script.push_back(actions);
    }

    pub fn set_peer_listening(&self, name: &str, listening: bool) {
        self.apply(MockAction::PeerListening {
            name: name.to_string(),
            listening,
        });
    }

    pub fn incoming_connection(&self, name: &str) {
        self.apply(MockAction::IncomingConnection(name.to_string()));
    }

    /// Make `create` fail for this name
    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_string());
    }

    /// Make `listen` fail for this name
    pub fn fail_listen(&self, name: &str) {
        self.lock().fail_listen.insert(name.to_string());
    }

    /// Make writes on streams of this client fail
    pub fn fail_advertise(&self, name: &str, fail: bool) {
        self.lock().peer(name).fail_advertise = fail;
    }

    /// Every timeout passed to poll, in order
    pub fn poll_timeouts(&self) -> Vec<PollTimeout> {
        self.lock().polls.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls.len()
    }

    pub fn connect_attempts(&self, name: &str) -> usize {
        self.lock().peers.get(name).map(|p| p.connects).unwrap_or(0)
    }

    pub fn accepts(&self, name: &str) -> usize {
        self.lock().peers.get(name).map(|p| p.accepts).unwrap_or(0)
    }

    /// Id of the stream the client most recently connected
    pub fn current_stream_id(&self, name: &str) -> Option<u64> {
        self.lock().peers.get(name).and_then(|p| p.current)
    }

    /// Bytes written on a stream so far
    pub fn written(&self, stream_id: u64) -> Vec<u8> {
        self.lock()
            .streams
            .get(&stream_id)
            .map(|s| s.written.clone())
            .unwrap_or_default()
    }

    /// Whether the stream has been dropped by its owner
    pub fn is_dropped(&self, stream_id: u64) -> bool {
        self.lock()
            .streams
            .get(&stream_id)
            .is_some_and(|s| s.dropped)
    }

    /// Every `(name, is_shutdown)` close call that released an endpoint
    pub fn closes(&self) -> Vec<(String, bool)> {
        self.lock().closes.clone()
    }
}

impl IpcTransport for MockTransport {
    type Endpoint = MockEndpoint;

    fn create(&self, name: &str, mode: ConnectionMode) -> IpcResult<MockEndpoint> {
        if name.is_empty() {
            return Err(IpcError::invalid_name(name, "name is empty"));
        }
        let mut state = self.lock();
        if state.fail_create.contains(name) {
            return Err(IpcError::invalid_name(name, "mock create failure"));
        }
        state.peer(name);

        Ok(MockEndpoint {
            name: name.to_string(),
            mode,
            state: self.state.clone(),
            listening: false,
            closed: false,
        })
    }

    fn poll(
        &self,
        handles: &mut [PollHandle<'_, MockEndpoint>],
        timeout: PollTimeout,
    ) -> IpcResult<usize> {
        let mut state = self.lock();
        state.polls.push(timeout);

        if let Some(actions) = state.script.pop_front() {
            for action in actions {
                state.apply(action);
            }
        }

        if std::mem::take(&mut state.fail_poll) {
            return Err(IpcError::mock("poll failed"));
        }

        let mut signaled = 0;
        for handle in handles.iter_mut() {
            handle.events = state.classify(handle.target);
            if handle.events != PollEvent::None {
                signaled += 1;
            }
        }

        if signaled == 0 && timeout == PollTimeout::Infinite && state.script.is_empty() {
            return Err(IpcError::mock("poll would block forever"));
        }

        Ok(signaled)
    }
}

/// Endpoint created by [`MockTransport`]
pub struct MockEndpoint {
    name: String,
    mode: ConnectionMode,
    state: Arc<Mutex<MockState>>,
    listening: bool,
    closed: bool,
}

impl MockEndpoint {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_mode(&self, mode: ConnectionMode) -> IpcResult<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(IpcError::WrongMode(self.mode))
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl IpcEndpoint for MockEndpoint {
    type Stream = MockStream;

    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn listen(&mut self) -> IpcResult<()> {
        self.require_mode(ConnectionMode::Server)?;
        if self.lock().fail_listen.contains(&self.name) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse).into());
        }
        self.listening = true;
        Ok(())
    }

    fn connect(&mut self) -> IpcResult<MockStream> {
        self.require_mode(ConnectionMode::Client)?;
        let mut state = self.lock();
        let peer = state.peer(&self.name);
        peer.connects += 1;
        if !peer.listening {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }

        let id = state.new_stream(&self.name);
        state.peer(&self.name).current = Some(id);
        Ok(MockStream {
            id,
            state: self.state.clone(),
        })
    }

    fn accept(&mut self) -> IpcResult<MockStream> {
        self.require_mode(ConnectionMode::Server)?;
        if !self.listening || self.closed {
            return Err(IpcError::NotListening(self.name.clone()));
        }
        let mut state = self.lock();
        let peer = state.peer(&self.name);
        if peer.pending == 0 {
            return Err(io::Error::from(io::ErrorKind::WouldBlock).into());
        }
        peer.pending -= 1;
        peer.accepts += 1;

        let id = state.new_stream(&self.name);
        Ok(MockStream {
            id,
            state: self.state.clone(),
        })
    }

    fn close(&mut self, is_shutdown: bool) -> IpcResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.listening = false;
        self.lock().closes.push((self.name.clone(), is_shutdown));
        Ok(())
    }
}

/// Stream handed out by [`MockEndpoint`]
pub struct MockStream {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl MockStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the endpoint that produced this stream
    pub fn name(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .streams
            .get(&self.id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let name = state
            .streams
            .get(&self.id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        if state.peer(&name).fail_advertise {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        match state.streams.get_mut(&self.id) {
            Some(stream) if !stream.hung_up => {
                stream.written.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(stream) = state.streams.get_mut(&self.id) {
            stream.dropped = true;
        }
    }
}
