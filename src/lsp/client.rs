//! Low-level LSP client: one subprocess, one JSON-RPC pipe.
//!
//! Each client owns exactly three tasks:
//!
//! - a **writer** draining a bounded queue onto the server's stdin, which
//!   serializes all outbound traffic (many servers tolerate pipelining
//!   poorly);
//! - a **reader** decoding frames off stdout, fulfilling pending request
//!   slots, answering server→client requests with canned replies, and
//!   broadcasting notifications;
//! - a **stderr drain** appending server logs to a per-server log file.
//!
//! Request IDs are monotonically increasing and unique within the client.
//! A timed-out request drops its pending slot but leaves the server
//! running; process death fails every pending request with `ServerDead`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::lsp::codec;

/// Outbound queue depth. Backpressure here throttles callers rather than
/// growing an unbounded buffer in front of a slow server.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Notifications surfaced to subscribers; everything else (progress,
/// cancellations, custom `$/` chatter) is consumed and dropped by the
/// reader.
#[derive(Debug, Clone)]
pub enum ServerNotification {
    /// `textDocument/publishDiagnostics`.
    Diagnostics(lsp_types::PublishDiagnosticsParams),
    /// `window/showMessage`.
    ShowMessage(lsp_types::ShowMessageParams),
    /// `window/logMessage`.
    LogMessage(lsp_types::LogMessageParams),
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// An async JSON-RPC client bound to one language-server subprocess.
#[derive(Debug)]
pub struct LspClient {
    /// Executable name, used in error messages and the log file name.
    server_name: String,
    next_id: AtomicI64,
    writer_tx: mpsc::Sender<Value>,
    pending: PendingMap,
    notify_tx: broadcast::Sender<ServerNotification>,
    alive: Arc<AtomicBool>,
    default_timeout: Duration,
    child: Mutex<Option<tokio::process::Child>>,
}

impl LspClient {
    /// Spawns the server process and wires up its I/O tasks.
    ///
    /// This performs no LSP handshake; `initialize` is an ordinary
    /// [`request`](Self::request) issued by the session layer.
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: &Path,
        stderr_log: Option<PathBuf>,
        default_timeout: Duration,
    ) -> Result<Self> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ServerDead(format!("failed to spawn '{command}': {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ServerDead(format!("{command}: no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ServerDead(format!("{command}: no stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ServerDead(format!("{command}: no stderr pipe")))?;

        let (writer_tx, writer_rx) = mpsc::channel::<Value>(WRITE_QUEUE_DEPTH);
        let (notify_tx, _) = broadcast::channel(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(writer_task(stdin, writer_rx));
        tokio::spawn(reader_task(
            stdout,
            pending.clone(),
            notify_tx.clone(),
            writer_tx.clone(),
            alive.clone(),
            command.to_string(),
        ));
        tokio::spawn(stderr_task(stderr, stderr_log, command.to_string()));

        Ok(Self {
            server_name: command.to_string(),
            next_id: AtomicI64::new(1),
            writer_tx,
            pending,
            notify_tx,
            alive,
            default_timeout,
            child: Mutex::new(Some(child)),
        })
    }

    /// The executable this client talks to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Whether the subprocess is still believed to be running.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Subscribes to the inbound notification stream. Each call returns a
    /// fresh receiver starting at the current position.
    pub fn notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.notify_tx.subscribe()
    }

    /// Sends a typed request and awaits its response.
    pub async fn request<R>(&self, params: R::Params) -> Result<R::Result>
    where
        R: lsp_types::request::Request,
    {
        self.request_with_timeout::<R>(params, self.default_timeout)
            .await
    }

    /// [`request`](Self::request) with an explicit deadline.
    pub async fn request_with_timeout<R>(
        &self,
        params: R::Params,
        timeout: Duration,
    ) -> Result<R::Result>
    where
        R: lsp_types::request::Request,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| Error::Protocol(format!("unserializable params: {e}")))?;
        let value = self.raw_request(R::METHOD, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::Protocol(format!("bad {} response: {e}", R::METHOD))
        })
    }

    /// Untyped request, used by the typed wrapper and by tests.
    pub async fn raw_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::ServerDead(self.server_name.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self.writer_tx.send(frame).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(Error::ServerDead(self.server_name.clone()));
        }

        // The reader may have drained the pending map just before our
        // insert landed; a dead server must fail now, not at the timeout.
        if !self.is_alive() {
            self.pending.lock().unwrap().remove(&id);
            return Err(Error::ServerDead(self.server_name.clone()));
        }

        match tokio::time::timeout(timeout, rx).await {
            // Deadline elapsed: forget the slot, keep the server.
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(Error::TimedOut(timeout))
            }
            // Reader dropped the sender without fulfilling it.
            Ok(Err(_)) => Err(Error::ServerDead(self.server_name.clone())),
            Ok(Ok(result)) => result,
        }
    }

    /// Sends a typed notification. Fire-and-forget: once enqueued it
    /// cannot fail late; enqueueing only fails when the server is gone.
    pub async fn notify<N>(&self, params: N::Params) -> Result<()>
    where
        N: lsp_types::notification::Notification,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| Error::Protocol(format!("unserializable params: {e}")))?;
        let frame = json!({
            "jsonrpc": "2.0",
            "method": N::METHOD,
            "params": params,
        });
        self.writer_tx
            .send(frame)
            .await
            .map_err(|_| Error::ServerDead(self.server_name.clone()))
    }

    /// Force-kills the subprocess. Graceful `shutdown`/`exit` sequencing
    /// is the session layer's job; this is the last resort after grace.
    pub async fn kill(&self) {
        let child = self.child.lock().unwrap().take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Waits for the subprocess to exit on its own, up to `grace`.
    pub async fn wait_exit(&self, grace: Duration) -> bool {
        let child = self.child.lock().unwrap().take();
        let Some(mut child) = child else {
            return true;
        };
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => true,
            Err(_) => {
                let _ = child.kill().await;
                false
            }
        }
    }
}

async fn writer_task(
    stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<Value>,
) {
    let mut stdin = stdin;
    while let Some(message) = rx.recv().await {
        if let Err(e) = codec::write_frame(&mut stdin, &message).await {
            warn!("lsp write failed, stopping writer: {e}");
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn reader_task(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    notify_tx: broadcast::Sender<ServerNotification>,
    writer_tx: mpsc::Sender<Value>,
    alive: Arc<AtomicBool>,
    server_name: String,
) {
    let mut reader = BufReader::new(stdout);

    loop {
        let message = match codec::read_frame(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("{server_name}: stdout closed");
                break;
            }
            Err(e) => {
                warn!("{server_name}: {e}");
                break;
            }
        };
        dispatch_inbound(&message, &pending, &notify_tx, &writer_tx, &server_name).await;
    }

    // Process is gone (or stream is garbage): everything still pending
    // resolves to ServerDead.
    alive.store(false, Ordering::SeqCst);
    let drained: Vec<_> = pending.lock().unwrap().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(Error::ServerDead(server_name.clone())));
    }
}

async fn dispatch_inbound(
    message: &Value,
    pending: &PendingMap,
    notify_tx: &broadcast::Sender<ServerNotification>,
    writer_tx: &mpsc::Sender<Value>,
    server_name: &str,
) {
    let method = message.get("method").and_then(Value::as_str);
    let id = message.get("id");

    match (method, id) {
        // Response to one of our requests.
        (None, Some(id)) => {
            let Some(id) = id.as_i64() else {
                warn!("{server_name}: response with non-integer id {id}");
                return;
            };
            let slot = pending.lock().unwrap().remove(&id);
            let Some(slot) = slot else {
                // Already timed out and forgotten; drop the late reply.
                trace!("{server_name}: dropping late response for id {id}");
                return;
            };
            let result = if let Some(error) = message.get("error") {
                Err(Error::Server {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown server error")
                        .to_string(),
                })
            } else {
                Ok(message.get("result").cloned().unwrap_or(Value::Null))
            };
            let _ = slot.send(result);
        }

        // Server→client request: answer with a canned minimal reply so
        // the server never blocks on us. The reader only enqueues; the
        // writer task does the actual I/O.
        (Some(method), Some(id)) => {
            let result = canned_reply(method, message.get("params"));
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            if writer_tx.send(reply).await.is_err() {
                warn!("{server_name}: writer gone, dropping reply to {method}");
            }
        }

        // Notification.
        (Some(method), None) => {
            if let Some(notification) = parse_notification(method, message.get("params")) {
                let _ = notify_tx.send(notification);
            }
        }

        (None, None) => {
            warn!("{server_name}: message with neither method nor id");
        }
    }
}

/// Minimal answers to the server→client requests common servers send.
fn canned_reply(method: &str, params: Option<&Value>) -> Value {
    match method {
        // One null per requested configuration item.
        "workspace/configuration" => {
            let count = params
                .and_then(|p| p.get("items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Value::Array(vec![Value::Null; count])
        }
        // Pick the first offered action.
        "window/showMessageRequest" => params
            .and_then(|p| p.get("actions"))
            .and_then(Value::as_array)
            .and_then(|actions| actions.first().cloned())
            .unwrap_or(Value::Null),
        "workspace/applyEdit" => json!({"applied": false}),
        // registerCapability, workspaceFolders, workDoneProgress/create
        // and anything unrecognized all accept a null result.
        _ => Value::Null,
    }
}

fn parse_notification(method: &str, params: Option<&Value>) -> Option<ServerNotification> {
    let params = params.cloned().unwrap_or(Value::Null);
    match method {
        "textDocument/publishDiagnostics" => serde_json::from_value(params)
            .ok()
            .map(ServerNotification::Diagnostics),
        "window/showMessage" => serde_json::from_value(params)
            .ok()
            .map(ServerNotification::ShowMessage),
        "window/logMessage" => serde_json::from_value(params)
            .ok()
            .map(ServerNotification::LogMessage),
        _ => None,
    }
}

async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    log_path: Option<PathBuf>,
    server_name: String,
) {
    let mut reader = BufReader::new(stderr).lines();
    let mut log = match log_path {
        Some(path) => {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .ok()
        }
        None => None,
    };

    while let Ok(Some(line)) = reader.next_line().await {
        match log.as_mut() {
            Some(file) => {
                let _ = file.write_all(line.as_bytes()).await;
                let _ = file.write_all(b"\n").await;
            }
            None => trace!("{server_name} stderr: {line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_configuration_reply_matches_item_count() {
        let params = json!({"items": [{"section": "rust"}, {"section": "cargo"}]});
        let reply = canned_reply("workspace/configuration", Some(&params));
        assert_eq!(reply, json!([null, null]));
    }

    #[test]
    fn test_canned_show_message_request_picks_first_action() {
        let params = json!({"message": "pick", "actions": [{"title": "Yes"}, {"title": "No"}]});
        let reply = canned_reply("window/showMessageRequest", Some(&params));
        assert_eq!(reply, json!({"title": "Yes"}));
    }

    #[test]
    fn test_canned_unknown_request_is_null() {
        assert_eq!(canned_reply("client/registerCapability", None), Value::Null);
        assert_eq!(canned_reply("workspace/workspaceFolders", None), Value::Null);
    }

    #[test]
    fn test_parse_notification_diagnostics() {
        let params = json!({
            "uri": "file:///tmp/a.rs",
            "diagnostics": [],
        });
        let parsed = parse_notification("textDocument/publishDiagnostics", Some(&params));
        assert!(matches!(parsed, Some(ServerNotification::Diagnostics(_))));
    }

    #[test]
    fn test_parse_notification_drops_progress() {
        let params = json!({"token": "t", "value": {"kind": "begin", "title": "indexing"}});
        assert!(parse_notification("$/progress", Some(&params)).is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_server_dead() {
        let err = LspClient::spawn(
            "leta-no-such-language-server",
            &[],
            Path::new("."),
            None,
            Duration::from_secs(1),
        )
        .err()
        .expect("spawn must fail");
        assert_eq!(err.kind(), "ServerDead");
    }

    // Drives the full client loop against `cat`, which echoes frames
    // back verbatim: a request written to stdin comes back on stdout
    // and must fulfill the matching pending slot.
    #[tokio::test]
    #[cfg(unix)]
    async fn test_echo_server_round_trip_ids() {
        let client = LspClient::spawn(
            "cat",
            &[],
            Path::new("."),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        // `cat` echoes our own request; the echo has both method and id,
        // so the reader treats it as a server->client request and queues
        // a canned null reply. That reply in turn echoes back as a
        // response and fulfills the pending slot.
        let result = client
            .raw_request("test/echo", json!({"x": 1}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);

        client.kill().await;
        assert!(!client.is_alive());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_dead_server_fails_pending() {
        let client = LspClient::spawn(
            "true",
            &[],
            Path::new("."),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        // `true` exits immediately; the request must fail with
        // ServerDead (or surface the closed pipe as ServerDead), not
        // hang until the timeout.
        let err = client
            .raw_request("test/ping", Value::Null, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ServerDead");
    }

    #[test]
    fn test_ids_monotonic() {
        let client_ids = AtomicI64::new(1);
        let a = client_ids.fetch_add(1, Ordering::SeqCst);
        let b = client_ids.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
