//! Local-only IPC transport and endpoint discovery.
//!
//! Frames are a big-endian `u32` length followed by that many bytes of
//! JSON. The transport is a Unix domain socket under the cache directory
//! on POSIX and a named pipe on Windows. A well-known endpoint file holds
//! the socket path (or pipe name) and the daemon PID.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::paths;

/// Upper bound on one frame; anything larger is a protocol error.
pub const MAX_FRAME: usize = 32 * 1024 * 1024;

/// Writes one length-prefixed JSON message.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)
        .map_err(|e| Error::Protocol(format!("unserializable message: {e}")))?;
    if body.len() > MAX_FRAME {
        return Err(Error::Protocol(format!("frame too large: {}", body.len())));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON message; `None` on clean EOF.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(Error::Protocol(format!("frame too large: {len}")));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("bad IPC payload: {e}")))
}

/// Contents of the endpoint discovery file.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct EndpointInfo {
    /// Socket path or pipe name.
    pub endpoint: String,
    /// Daemon PID.
    pub pid: u32,
}

/// Default endpoint for this user.
pub fn default_endpoint() -> Result<String> {
    #[cfg(unix)]
    {
        Ok(paths::cache_dir()?
            .join("daemon.sock")
            .to_string_lossy()
            .into_owned())
    }
    #[cfg(windows)]
    {
        let user = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
        Ok(format!(r"\\.\pipe\leta-{user}"))
    }
}

/// Writes the endpoint file atomically.
pub fn write_endpoint(info: &EndpointInfo) -> Result<()> {
    paths::ensure_dirs()?;
    let path = paths::endpoint_file()?;
    let body = serde_json::to_string(info)
        .map_err(|e| Error::Protocol(format!("endpoint file: {e}")))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Reads the endpoint file, if present and parseable.
pub fn read_endpoint() -> Option<EndpointInfo> {
    let path = paths::endpoint_file().ok()?;
    let body = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&body).ok()
}

/// Removes the endpoint file.
pub fn remove_endpoint() {
    if let Ok(path) = paths::endpoint_file() {
        let _ = std::fs::remove_file(path);
    }
}

/// Whether a recorded daemon PID is still alive.
pub fn pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0: existence probe only.
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(windows)]
    {
        let _ = pid;
        true
    }
}

#[cfg(unix)]
mod platform {
    use super::*;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};

    /// Listening end of the IPC transport.
    pub struct IpcListener {
        inner: UnixListener,
        path: PathBuf,
    }

    /// One connected client, daemon side.
    pub type IpcStream = UnixStream;

    /// One connected client, CLI side. Same type on Unix.
    pub type ClientStream = UnixStream;

    impl IpcListener {
        /// Binds the socket, replacing a stale file from a dead daemon.
        pub fn bind(endpoint: &str) -> Result<Self> {
            let path = PathBuf::from(endpoint);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            let inner = UnixListener::bind(&path)?;
            // Owner-only: the daemon speaks for this user.
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
            Ok(Self { inner, path })
        }

        /// Accepts one client.
        pub async fn accept(&self) -> Result<IpcStream> {
            let (stream, _) = self.inner.accept().await?;
            Ok(stream)
        }

        /// Removes the socket file.
        pub fn cleanup(&self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Connects to a daemon endpoint.
    pub async fn connect(endpoint: &str) -> Result<ClientStream> {
        Ok(UnixStream::connect(endpoint).await?)
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    /// Listening end of the IPC transport.
    pub struct IpcListener {
        endpoint: String,
        next: Option<NamedPipeServer>,
    }

    /// One connected client, daemon side.
    pub type IpcStream = NamedPipeServer;

    /// One connected client, CLI side.
    pub type ClientStream = tokio::net::windows::named_pipe::NamedPipeClient;

    impl IpcListener {
        /// Creates the first pipe instance.
        pub fn bind(endpoint: &str) -> Result<Self> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(endpoint)?;
            Ok(Self {
                endpoint: endpoint.to_string(),
                next: Some(first),
            })
        }

        /// Accepts one client; a fresh pipe instance is created for the
        /// next connection.
        pub async fn accept(&mut self) -> Result<IpcStream> {
            let server = match self.next.take() {
                Some(server) => server,
                None => ServerOptions::new().create(&self.endpoint)?,
            };
            server.connect().await?;
            self.next = Some(ServerOptions::new().create(&self.endpoint)?);
            Ok(server)
        }

        /// Nothing to clean up for named pipes.
        pub fn cleanup(&self) {}
    }

    /// Connects to a daemon endpoint.
    pub async fn connect(endpoint: &str) -> Result<ClientStream> {
        Ok(ClientOptions::new().open(endpoint)?)
    }
}

pub use platform::{ClientStream, IpcListener, IpcStream, connect};
