//! Unix domain socket transport

use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use diagport_util::fits_socket_address;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags};
use tracing::{debug, info};

use crate::{
    ConnectionMode, IpcEndpoint, IpcError, IpcResult, IpcTransport, PollEvent, PollHandle,
    PollTarget, PollTimeout,
};

/// Transport over Unix domain sockets; endpoint names are socket paths
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixTransport;

impl UnixTransport {
    pub fn new() -> Self {
        Self
    }
}

impl IpcTransport for UnixTransport {
    type Endpoint = UnixEndpoint;

    fn create(&self, name: &str, mode: ConnectionMode) -> IpcResult<UnixEndpoint> {
        let path = PathBuf::from(name);
        if !fits_socket_address(&path) {
            return Err(IpcError::invalid_name(
                name,
                "socket path is empty or too long",
            ));
        }

        Ok(UnixEndpoint {
            name: name.to_string(),
            path,
            mode,
            listener: None,
            closed: false,
        })
    }

    fn poll(
        &self,
        handles: &mut [PollHandle<'_, UnixEndpoint>],
        timeout: PollTimeout,
    ) -> IpcResult<usize> {
        let fds: Vec<Option<BorrowedFd<'_>>> = handles.iter().map(|h| target_fd(h.target)).collect();

        // A server whose listener is gone cannot be polled at all
        if fds.iter().any(Option::is_none) {
            let mut broken = 0;
            for (handle, fd) in handles.iter_mut().zip(&fds) {
                handle.events = match fd {
                    Some(_) => PollEvent::None,
                    None => {
                        broken += 1;
                        PollEvent::Error
                    }
                };
            }
            return Ok(broken);
        }

        let mut poll_fds: Vec<PollFd<'_>> = fds
            .iter()
            .flatten()
            .map(|fd| PollFd::new(*fd, PollFlags::POLLIN | PollFlags::POLLPRI))
            .collect();

        loop {
            match nix::poll::poll(&mut poll_fds, nix_timeout(timeout)) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut signaled = 0;
        for (handle, poll_fd) in handles.iter_mut().zip(&poll_fds) {
            handle.events = classify(poll_fd.revents().unwrap_or(PollFlags::empty()));
            if handle.events != PollEvent::None {
                signaled += 1;
            }
        }

        Ok(signaled)
    }
}

fn target_fd(target: PollTarget<'_, UnixEndpoint>) -> Option<BorrowedFd<'_>> {
    match target {
        PollTarget::Listener(endpoint) => endpoint.listener.as_ref().map(|l| l.as_fd()),
        PollTarget::Stream(stream) => Some(stream.as_fd()),
    }
}

fn nix_timeout(timeout: PollTimeout) -> nix::poll::PollTimeout {
    match timeout {
        PollTimeout::Infinite => nix::poll::PollTimeout::NONE,
        PollTimeout::After(d) => {
            nix::poll::PollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX))
        }
    }
}

/// Map `revents` to a poll event. Hangup wins over pending data so a closed
/// peer is always noticed.
pub(crate) fn classify(revents: PollFlags) -> PollEvent {
    if revents.contains(PollFlags::POLLHUP) {
        PollEvent::Hangup
    } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        PollEvent::Error
    } else if revents.intersects(PollFlags::POLLIN | PollFlags::POLLPRI) {
        PollEvent::Signaled
    } else {
        PollEvent::None
    }
}

/// Bind a listener at `path` and run `secure` on the new socket file. The file
/// is removed again if `secure` fails.
fn bind_secured(
    path: &Path,
    secure: impl FnOnce(&Path) -> std::io::Result<()>,
) -> IpcResult<UnixListener> {
    let listener = UnixListener::bind(path)?;
    if let Err(e) = secure(path) {
        drop(listener);
        remove_socket_file(path)?;
        return Err(e.into());
    }
    Ok(listener)
}

fn remove_socket_file(path: &Path) -> IpcResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One named socket, either listened on or connected to
#[derive(Debug)]
pub struct UnixEndpoint {
    name: String,
    path: PathBuf,
    mode: ConnectionMode,
    listener: Option<UnixListener>,
    closed: bool,
}

impl UnixEndpoint {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    fn require_mode(&self, mode: ConnectionMode) -> IpcResult<()> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(IpcError::WrongMode(self.mode))
        }
    }
}

impl IpcEndpoint for UnixEndpoint {
    type Stream = UnixStream;

    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn listen(&mut self) -> IpcResult<()> {
        self.require_mode(ConnectionMode::Server)?;

        // Remove a stale socket left by an earlier process
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let listener = bind_secured(&self.path, |path| {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        })?;

        info!(path = %self.path.display(), "Listening for diagnostic connections");

        self.listener = Some(listener);
        self.closed = false;
        Ok(())
    }

    fn connect(&mut self) -> IpcResult<UnixStream> {
        self.require_mode(ConnectionMode::Client)?;
        Ok(UnixStream::connect(&self.path)?)
    }

    fn accept(&mut self) -> IpcResult<UnixStream> {
        self.require_mode(ConnectionMode::Server)?;
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::NotListening(self.name.clone()))?;
        let (stream, _) = listener.accept()?;
        Ok(stream)
    }

    fn close(&mut self, is_shutdown: bool) -> IpcResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // The socket file goes with the listener on either close path
        if self.listener.take().is_some() {
            debug!(path = %self.path.display(), is_shutdown, "Closing listener");
            remove_socket_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn classify_prefers_hangup() {
        assert_eq!(classify(PollFlags::POLLIN | PollFlags::POLLHUP), PollEvent::Hangup);
        assert_eq!(classify(PollFlags::POLLERR), PollEvent::Error);
        assert_eq!(classify(PollFlags::POLLNVAL), PollEvent::Error);
        assert_eq!(classify(PollFlags::POLLIN), PollEvent::Signaled);
        assert_eq!(classify(PollFlags::empty()), PollEvent::None);
    }

    #[test]
    fn create_rejects_bad_names() {
        let transport = UnixTransport::new();
        assert!(transport.create("", ConnectionMode::Client).is_err());

        let long = format!("/tmp/{}", "a".repeat(200));
        assert!(matches!(
            transport.create(&long, ConnectionMode::Server),
            Err(IpcError::InvalidName { .. })
        ));
    }

    #[test]
    fn listen_creates_socket_and_shutdown_removes_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("diag.sock");
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();

        endpoint.listen().unwrap();
        assert!(path.exists());
        assert!(endpoint.is_listening());

        endpoint.close(true).unwrap();
        assert!(!path.exists());
        assert!(!endpoint.is_listening());
    }

    #[test]
    fn non_shutdown_close_removes_socket_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("diag.sock");
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();

        endpoint.listen().unwrap();
        endpoint.close(false).unwrap();
        assert!(!path.exists());

        // a later shutdown close has nothing left to do
        endpoint.close(true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn failed_permissions_remove_bound_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chmod.sock");

        let result = bind_secured(&path, |_| {
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied))
        });

        assert!(matches!(result, Err(IpcError::Io(_))));
        assert!(!path.exists());

        let listener = bind_secured(&path, |_| Ok(())).unwrap();
        assert!(path.exists());
        drop(listener);
    }

    #[test]
    fn close_leaves_foreign_file_alone_when_not_listening() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never.sock");
        std::fs::write(&path, b"").unwrap();
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();

        endpoint.close(true).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn poll_times_out_without_activity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quiet.sock");
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();
        endpoint.listen().unwrap();

        let mut handles = vec![PollHandle::listener(&endpoint, 0)];
        let ready = transport
            .poll(&mut handles, PollTimeout::After(Duration::from_millis(10)))
            .unwrap();

        assert_eq!(ready, 0);
        assert_eq!(handles[0].events, PollEvent::None);
    }

    #[test]
    fn poll_signals_pending_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.sock");
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();
        endpoint.listen().unwrap();
        let _peer = UnixStream::connect(&path).unwrap();

        let mut handles = vec![PollHandle::listener(&endpoint, 3)];
        let ready = transport.poll(&mut handles, PollTimeout::Infinite).unwrap();

        assert_eq!(ready, 1);
        assert_eq!(handles[0].events, PollEvent::Signaled);
        assert_eq!(handles[0].owner, 3);
    }

    #[test]
    fn closed_listener_polls_as_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let transport = UnixTransport::new();
        let mut endpoint = transport
            .create(path.to_str().unwrap(), ConnectionMode::Server)
            .unwrap();
        endpoint.listen().unwrap();
        endpoint.close(false).unwrap();

        let mut handles = vec![PollHandle::listener(&endpoint, 0)];
        let ready = transport.poll(&mut handles, PollTimeout::Infinite).unwrap();

        assert_eq!(ready, 1);
        assert_eq!(handles[0].events, PollEvent::Error);
    }

    #[test]
    fn stream_hangup_is_reported() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);

        let transport = UnixTransport::new();
        let mut handles: Vec<PollHandle<'_, UnixEndpoint>> = vec![PollHandle::stream(&ours, 0)];
        transport.poll(&mut handles, PollTimeout::Infinite).unwrap();

        assert_eq!(handles[0].events, PollEvent::Hangup);
    }
}
