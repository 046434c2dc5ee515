//! Port registration, the acquisition loop and session draining

use diagport_config::PortSpec;
use diagport_ipc::{ConnectionMode, IpcStreamFactory, IpcTransport, TransportStream};
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// How the acquisition loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop was requested
    Stopped,
    /// The factory could not produce a stream
    Failed,
}

/// Register every port with the factory, logging failures.
///
/// Returns the number of ports registered.
pub fn register_ports<T: IpcTransport>(
    factory: &mut IpcStreamFactory<T>,
    ports: &[PortSpec],
) -> usize {
    let mut registered = 0;
    for port in ports {
        let mut callback = |message: &str, code: i32| {
            warn!(port = %port.name, mode = %port.mode, code, "{}", message);
        };
        let ok = match port.mode {
            ConnectionMode::Server => factory.create_server(&port.name, &mut callback),
            ConnectionMode::Client => factory.create_client(&port.name, &mut callback),
        };
        if ok {
            registered += 1;
        }
    }
    registered
}

/// Hand every stream the factory produces to `on_stream` until a stop is
/// requested or acquisition fails. The factory is shut down on the way out.
pub fn run_acquisition_loop<T, F>(
    mut factory: IpcStreamFactory<T>,
    stop: &AtomicBool,
    mut on_stream: F,
) -> LoopExit
where
    T: IpcTransport,
    F: FnMut(u64, TransportStream<T>),
{
    let mut callback = |message: &str, code: i32| {
        warn!(code, "{}", message);
    };

    let mut sessions: u64 = 0;
    let exit = loop {
        if stop.load(Ordering::Acquire) {
            break LoopExit::Stopped;
        }

        let Some(stream) = factory.get_next_available_stream(&mut callback) else {
            if stop.load(Ordering::Acquire) {
                break LoopExit::Stopped;
            }
            error!(sessions, "Stream acquisition failed");
            break LoopExit::Failed;
        };

        if stop.load(Ordering::Acquire) {
            break LoopExit::Stopped;
        }

        sessions += 1;
        debug!(session = sessions, "Stream acquired");
        on_stream(sessions, stream);
    };

    factory.shutdown(&mut callback);
    info!(sessions, exit = ?exit, "Acquisition loop finished");
    exit
}

/// Run [`run_acquisition_loop`] on its own thread
pub fn spawn_acquisition_loop<T, F>(
    factory: IpcStreamFactory<T>,
    stop: Arc<AtomicBool>,
    on_stream: F,
) -> io::Result<JoinHandle<LoopExit>>
where
    T: IpcTransport + Send + 'static,
    T::Endpoint: Send + 'static,
    TransportStream<T>: Send + 'static,
    F: FnMut(u64, TransportStream<T>) + Send + 'static,
{
    thread::Builder::new()
        .name("diagport-loop".into())
        .spawn(move || run_acquisition_loop(factory, &stop, on_stream))
}

/// Read a session until EOF, logging what arrives. Returns the byte count.
pub fn drain_stream<R: Read>(session: u64, mut reader: R) -> io::Result<u64> {
    let mut buf = [0u8; 4096];
    let mut total: u64 = 0;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                debug!(session, bytes = n, total, "Received data");
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    info!(session, total, "Session closed");
    Ok(total)
}

/// Drain a session on a dedicated thread
pub fn spawn_drain<R: Read + Send + 'static>(
    session: u64,
    reader: R,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("diagport-session-{}", session))
        .spawn(move || {
            if let Err(e) = drain_stream(session, reader) {
                warn!(session, error = %e, "Session read failed");
            }
        })
}

/// Socket files created by the listening ports
pub fn listen_socket_paths(ports: &[PortSpec]) -> Vec<PathBuf> {
    ports
        .iter()
        .filter(|port| port.mode == ConnectionMode::Server)
        .map(|port| PathBuf::from(&port.name))
        .collect()
}

/// Nudge a loop blocked in poll by connecting once to a listen socket. The
/// loop then sees the stop request and shuts the factory down.
///
/// Returns false when no listen socket accepted the connection.
pub fn wake_acquisition_loop(listen_paths: &[PathBuf]) -> bool {
    for path in listen_paths {
        match UnixStream::connect(path) {
            Ok(_) => {
                debug!(path = %path.display(), "Woke acquisition loop");
                return true;
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Wake connect failed"),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagport_ipc::{MockTransport, UnixTransport};
    use std::io::Cursor;

    fn mock_factory(ports: &[PortSpec]) -> (MockTransport, IpcStreamFactory<MockTransport>, usize) {
        let mock = MockTransport::new();
        let mut factory = IpcStreamFactory::new(mock.clone());
        let registered = register_ports(&mut factory, ports);
        (mock, factory, registered)
    }

    #[test]
    fn test_register_ports_skips_failures() {
        let ports = vec![
            PortSpec::new("srv", ConnectionMode::Server),
            PortSpec::new("bad", ConnectionMode::Server),
            PortSpec::new("tool", ConnectionMode::Client),
        ];
        let mock = MockTransport::new();
        mock.fail_listen("bad");
        let mut factory = IpcStreamFactory::new(mock.clone());

        assert_eq!(register_ports(&mut factory, &ports), 2);
        assert_eq!(factory.connection_count(), 2);
    }

    #[test]
    fn test_loop_hands_out_stream_then_stops() {
        let (mock, factory, registered) =
            mock_factory(&[PortSpec::new("srv", ConnectionMode::Server)]);
        assert_eq!(registered, 1);
        mock.incoming_connection("srv");

        let stop = Arc::new(AtomicBool::new(false));
        let mut sessions = Vec::new();
        let exit = run_acquisition_loop(factory, &stop.clone(), |session, stream| {
            sessions.push((session, stream.name()));
            stop.store(true, Ordering::Release);
        });

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(sessions, vec![(1, "srv".to_string())]);
        assert_eq!(mock.accepts("srv"), 1);
        assert_eq!(mock.closes(), vec![("srv".to_string(), true)]);
    }

    #[test]
    fn test_loop_fails_when_poll_fails() {
        let (mock, factory, _) = mock_factory(&[PortSpec::new("srv", ConnectionMode::Server)]);
        mock.queue_round(vec![diagport_ipc::MockAction::FailPoll]);

        let stop = AtomicBool::new(false);
        let exit = run_acquisition_loop(factory, &stop, |_, _| panic!("no stream expected"));

        assert_eq!(exit, LoopExit::Failed);
        assert_eq!(mock.poll_count(), 1);
        assert_eq!(mock.closes(), vec![("srv".to_string(), true)]);
    }

    #[test]
    fn test_loop_respects_early_stop() {
        let (mock, factory, _) = mock_factory(&[PortSpec::new("srv", ConnectionMode::Server)]);

        let stop = AtomicBool::new(true);
        let exit = run_acquisition_loop(factory, &stop, |_, _| {});

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(mock.poll_count(), 0);
        assert_eq!(mock.closes().len(), 1);
    }

    #[test]
    fn test_spawned_loop_joins() {
        let (mock, factory, _) = mock_factory(&[PortSpec::new("srv", ConnectionMode::Server)]);
        mock.incoming_connection("srv");

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn_acquisition_loop(factory, stop.clone(), move |session, stream| {
            tx.send((session, stream.id())).unwrap();
        })
        .unwrap();

        let (session, _) = rx.recv().unwrap();
        assert_eq!(session, 1);
        // With nothing else scripted the mock refuses to block forever
        assert_eq!(handle.join().unwrap(), LoopExit::Failed);
    }

    #[test]
    fn test_drain_counts_bytes() {
        let data = vec![7u8; 10_000];
        assert_eq!(drain_stream(1, Cursor::new(data)).unwrap(), 10_000);
        assert_eq!(drain_stream(2, Cursor::new(Vec::new())).unwrap(), 0);
    }

    #[test]
    fn test_listen_socket_paths() {
        let ports = vec![
            PortSpec::new("/tmp/a.sock", ConnectionMode::Server),
            PortSpec::new("/tmp/tool.sock", ConnectionMode::Client),
        ];
        assert_eq!(listen_socket_paths(&ports), vec![PathBuf::from("/tmp/a.sock")]);
    }

    #[test]
    fn test_wake_runs_factory_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("wake.sock");
        let ports = vec![PortSpec::new(socket.to_string_lossy(), ConnectionMode::Server)];

        let mut factory = IpcStreamFactory::new(UnixTransport::new());
        assert_eq!(register_ports(&mut factory, &ports), 1);

        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_acquisition_loop(factory, stop.clone(), |_, _| {
            panic!("the wake connection must not be handed out")
        })
        .unwrap();

        // let the loop block in an infinite poll
        thread::sleep(std::time::Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        assert!(wake_acquisition_loop(&listen_socket_paths(&ports)));

        assert_eq!(handle.join().unwrap(), LoopExit::Stopped);
        // only the factory shutdown removes the socket file
        assert!(!socket.exists());
        assert!(!wake_acquisition_loop(&listen_socket_paths(&ports)));
    }
}
