//! CLI-side daemon discovery, auto-spawn, and request round-trips.
//!
//! The CLI is short-lived: it reads the endpoint file, connects, and if
//! that fails it launches `leta-daemon` detached and retries until the
//! fresh endpoint accepts. A stale endpoint file (dead PID) is treated as
//! absent.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::ipc;
use super::protocol::{Format, Request, Response};
use crate::error::{Error, Result};

/// How long to wait for a freshly spawned daemon to come up.
const SPAWN_WAIT: Duration = Duration::from_secs(10);

/// Endpoint info when a live daemon is recorded.
pub fn running_daemon() -> Option<ipc::EndpointInfo> {
    let info = ipc::read_endpoint()?;
    if ipc::pid_alive(info.pid) {
        Some(info)
    } else {
        None
    }
}

/// Locates the `leta-daemon` binary: next to the current executable
/// first, then on PATH.
fn find_daemon_binary() -> Result<PathBuf> {
    let name = if cfg!(windows) {
        "leta-daemon.exe"
    } else {
        "leta-daemon"
    };
    if let Ok(current) = std::env::current_exe()
        && let Some(dir) = current.parent()
    {
        let sibling = dir.join(name);
        if sibling.exists() {
            return Ok(sibling);
        }
    }
    which::which(name).map_err(|_| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "leta-daemon binary not found (not next to leta, not on PATH)",
        ))
    })
}

/// Spawns the daemon detached with null stdio.
pub fn spawn_daemon() -> Result<()> {
    let binary = find_daemon_binary()?;
    debug!(binary = %binary.display(), "spawning daemon");
    std::process::Command::new(binary)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

async fn try_connect() -> Result<ipc::ClientStream> {
    let info = running_daemon().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no endpoint file",
        ))
    })?;
    ipc::connect(&info.endpoint).await
}

/// Connects to the daemon, spawning it when the endpoint is missing or
/// stale.
pub async fn connect_or_spawn() -> Result<ipc::ClientStream> {
    if let Ok(stream) = try_connect().await {
        return Ok(stream);
    }

    spawn_daemon()?;
    let deadline = tokio::time::Instant::now() + SPAWN_WAIT;
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        match try_connect().await {
            Ok(stream) => return Ok(stream),
            Err(_) if tokio::time::Instant::now() < deadline => continue,
            Err(e) => return Err(e),
        }
    }
}

/// One request/response round-trip, auto-spawning as needed.
///
/// A transport-level `Err` here means the daemon is unreachable; handler
/// failures come back inside [`Response::Error`].
pub async fn round_trip(request: &Request) -> Result<Response> {
    let mut stream = connect_or_spawn().await?;
    ipc::write_message(&mut stream, request).await?;
    ipc::read_message::<_, Response>(&mut stream)
        .await?
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "daemon closed the connection",
            ))
        })
}

/// Stops a running daemon, if any. Returns whether one was stopped.
pub async fn stop_daemon() -> Result<bool> {
    let Some(info) = running_daemon() else {
        return Ok(false);
    };
    let mut stream = ipc::connect(&info.endpoint).await?;
    let request = Request::new("shutdown", serde_json::Value::Null, Format::Plain);
    ipc::write_message(&mut stream, &request).await?;
    let _ = ipc::read_message::<_, Response>(&mut stream).await;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_running_daemon_rejects_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("LETA_CACHE_DIR", dir.path()) };

        // PIDs near the u32 ceiling are never live.
        ipc::write_endpoint(&ipc::EndpointInfo {
            endpoint: "/tmp/leta-nonexistent.sock".to_string(),
            pid: u32::MAX - 1,
        })
        .unwrap();
        assert!(running_daemon().is_none());

        ipc::write_endpoint(&ipc::EndpointInfo {
            endpoint: "/tmp/leta-nonexistent.sock".to_string(),
            pid: std::process::id(),
        })
        .unwrap();
        assert!(running_daemon().is_some());

        unsafe { std::env::remove_var("LETA_CACHE_DIR") };
    }

    #[test]
    #[serial]
    fn test_stop_daemon_without_endpoint_is_false() {
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("LETA_CACHE_DIR", dir.path()) };
        let stopped = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(stop_daemon())
            .unwrap();
        assert!(!stopped);
        unsafe { std::env::remove_var("LETA_CACHE_DIR") };
    }
}
