//! Integration tests for diagportd
//!
//! These tests run the daemon binary against sockets in a temporary directory.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn daemon(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_diagportd"));
    cmd.arg("--config")
        .arg(config)
        .env_remove("DIAGPORT_PORTS")
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

fn wait_for(path: &Path) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn terminate(child: Child) -> Output {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_exits_when_nothing_is_registered() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "config_version = 1\n").unwrap();

    let status = daemon(&config).status().unwrap();
    assert!(!status.success());
}

#[test]
fn test_rejects_invalid_config() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "config_version = 1\n[backoff]\nmin_ms = 0\n").unwrap();

    let status = daemon(&config).status().unwrap();
    assert!(!status.success());
}

#[test]
fn test_serves_listen_port_and_cleans_up_on_sigterm() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("diag.sock");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "config_version = 1\n[[ports]]\nname = \"{}\"\nmode = \"listen\"\n",
            socket.display()
        ),
    )
    .unwrap();

    let child = daemon(&config).stdout(Stdio::piped()).spawn().unwrap();
    assert!(wait_for(&socket), "daemon never created its socket");

    let mut session = UnixStream::connect(&socket).unwrap();
    session.write_all(b"hello").unwrap();
    drop(session);

    let output = terminate(child);
    assert!(output.status.success());
    assert!(!socket.exists());

    // the acquisition loop woke up and ran the factory shutdown itself
    let logs = String::from_utf8_lossy(&output.stdout);
    assert!(logs.contains("Shutting down IPC connections"), "{logs}");
    assert!(logs.contains("Acquisition loop finished"), "{logs}");
    assert!(logs.contains("Shutdown complete"), "{logs}");
}

#[test]
fn test_port_list_from_environment() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("env.sock");
    let absent = dir.path().join("absent.sock");
    let config = dir.path().join("missing.toml");

    // A missing config file means defaults; ports come from the environment
    let child = daemon(&config)
        .env(
            "DIAGPORT_PORTS",
            format!("{},listen;{}", socket.display(), absent.display()),
        )
        .spawn()
        .unwrap();
    assert!(wait_for(&socket), "daemon never created its socket");

    let output = terminate(child);
    assert!(output.status.success());
    assert!(!socket.exists());
}
