//! The long-lived daemon: accept loop, dispatch, lifecycle.
//!
//! One event loop accepts IPC connections; each connection gets a task;
//! each request runs as a child task so a client disconnect cancels the
//! work it asked for. Shutdown (RPC or signal) stops accepting, shuts
//! every language server down, snapshots the hover cache, and removes
//! the endpoint file.

pub mod ipc;
pub mod protocol;
pub mod spawn;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ops::{self, OpContext, OpOutput, WorkspaceInfo};
use crate::paths;
use protocol::{Request, Response};

/// Shared daemon state.
pub struct Daemon {
    ctx: Arc<OpContext>,
    endpoint: String,
    start_time: Instant,
    requests: AtomicU64,
    active_connections: AtomicU64,
    last_activity: std::sync::Mutex<Instant>,
    shutdown_tx: broadcast::Sender<()>,
}

/// How long shutdown waits for in-flight requests to finish.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

impl Daemon {
    /// Creates the daemon from configuration.
    pub fn new(config: Config) -> Result<Self> {
        let endpoint = ipc::default_endpoint()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            ctx: Arc::new(OpContext::new(config)),
            endpoint,
            start_time: Instant::now(),
            requests: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            last_activity: std::sync::Mutex::new(Instant::now()),
            shutdown_tx,
        })
    }

    /// Runs until shutdown. Binds the endpoint, writes the discovery
    /// file, then serves.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        paths::ensure_dirs()?;

        if let Ok(snapshot) = paths::hover_cache_file() {
            let loaded = self.ctx.hover.load(&snapshot);
            if loaded > 0 {
                debug!(loaded, "hover cache snapshot restored");
            }
        }
        self.ctx
            .workspaces
            .register_configured(&self.ctx.config)
            .await;

        #[cfg(unix)]
        let listener = ipc::IpcListener::bind(&self.endpoint)?;
        #[cfg(windows)]
        let mut listener = ipc::IpcListener::bind(&self.endpoint)?;

        ipc::write_endpoint(&ipc::EndpointInfo {
            endpoint: self.endpoint.clone(),
            pid: std::process::id(),
        })?;
        info!(endpoint = %self.endpoint, "daemon listening");

        self.clone().spawn_signal_handler();
        self.clone().spawn_idle_checker();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let daemon = self.clone();
                        daemon.active_connections.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            if let Err(e) = daemon.clone().serve_connection(stream).await {
                                debug!("connection ended: {e}");
                            }
                            daemon.active_connections.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("accept failed: {e}"),
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("shutting down");
        // Stop accepting, then let in-flight requests finish within the
        // drain deadline.
        let drain_until = Instant::now() + DRAIN_DEADLINE;
        while self.active_connections.load(Ordering::SeqCst) > 0 && Instant::now() < drain_until {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.ctx.workspaces.shutdown_all().await;
        if let Ok(snapshot) = paths::hover_cache_file()
            && let Err(e) = self.ctx.hover.save(&snapshot)
        {
            warn!("hover cache snapshot failed: {e}");
        }
        listener.cleanup();
        ipc::remove_endpoint();
        Ok(())
    }

    fn spawn_signal_handler(self: Arc<Self>) {
        #[cfg(not(unix))]
        let _ = &self;
        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM"),
                _ = sigint.recv() => info!("SIGINT"),
            }
            let _ = self.shutdown_tx.send(());
        });
    }

    fn spawn_idle_checker(self: Arc<Self>) {
        let idle_limit = self.ctx.config.daemon.idle_shutdown_secs;
        if idle_limit == 0 {
            return;
        }
        tokio::spawn(async move {
            let limit = Duration::from_secs(idle_limit);
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let idle = self.last_activity.lock().unwrap().elapsed();
                if idle > limit {
                    info!(?idle, "idle shutdown");
                    let _ = self.shutdown_tx.send(());
                    return;
                }
            }
        });
    }

    async fn serve_connection(self: Arc<Self>, stream: ipc::IpcStream) -> Result<()> {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffered: Option<Request> = None;

        loop {
            let request = match buffered.take() {
                Some(request) => request,
                None => match ipc::read_message::<_, Request>(&mut reader).await? {
                    Some(request) => request,
                    None => return Ok(()),
                },
            };
            *self.last_activity.lock().unwrap() = Instant::now();
            self.requests.fetch_add(1, Ordering::Relaxed);

            let shutdown_requested = request.op == "shutdown";
            let daemon = self.clone();
            let mut handle = tokio::spawn(async move { daemon.dispatch(request).await });

            // Watch for disconnect while the handler runs: a closed pipe
            // cancels the in-flight task.
            let response = loop {
                tokio::select! {
                    joined = &mut handle => {
                        break joined.unwrap_or_else(|e| {
                            Response::from_result(Err(Error::Protocol(format!(
                                "handler panicked: {e}"
                            ))))
                        });
                    }
                    next = ipc::read_message::<_, Request>(&mut reader), if buffered.is_none() => {
                        match next {
                            Ok(Some(request)) => buffered = Some(request),
                            Ok(None) | Err(_) => {
                                handle.abort();
                                return Ok(());
                            }
                        }
                    }
                }
            };

            ipc::write_message(&mut writer, &response).await?;

            if shutdown_requested {
                let _ = self.shutdown_tx.send(());
                return Ok(());
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Response {
        debug!(op = %request.op, "dispatch");
        Response::from_result(self.handle(request).await)
    }

    async fn handle(&self, request: Request) -> Result<OpOutput> {
        let ctx = &self.ctx;
        let params = request.params;

        fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
            serde_json::from_value(params)
                .map_err(|e| Error::Usage(format!("bad parameters: {e}")))
        }

        match request.op.as_str() {
            "grep" => ops::grep::grep(ctx, parse(params)?).await,
            "show" => ops::show::show(ctx, parse(params)?).await,
            "hover" => ops::show::hover(ctx, parse(params)?).await,
            "refs" => ops::navigate::refs(ctx, parse(params)?).await,
            "implementations" => ops::navigate::implementations(ctx, parse(params)?).await,
            "declaration" => ops::navigate::declaration(ctx, parse(params)?).await,
            "subtypes" => {
                ops::navigate::type_hierarchy(
                    ctx,
                    parse(params)?,
                    ops::navigate::HierarchyDirection::Sub,
                )
                .await
            }
            "supertypes" => {
                ops::navigate::type_hierarchy(
                    ctx,
                    parse(params)?,
                    ops::navigate::HierarchyDirection::Super,
                )
                .await
            }
            "calls" => ops::calls::calls(ctx, parse(params)?).await,
            "diagnostics" => ops::diagnostics::diagnostics(ctx, parse(params)?).await,
            "rename" => ops::edit::rename(ctx, parse(params)?).await,
            "mv" => ops::edit::mv(ctx, parse(params)?).await,
            "format" => ops::edit::format(ctx, parse(params)?).await,
            "organize-imports" => ops::edit::organize_imports(ctx, parse(params)?).await,
            "replace-function" => ops::edit::replace_function(ctx, parse(params)?).await,
            "files" => ops::files::files(ctx, parse(params)?).await,
            "workspace-add" => self.workspace_add(parse(params)?).await,
            "workspace-remove" => self.workspace_remove(parse(params)?).await,
            "workspace-restart" => self.workspace_restart(parse(params)?).await,
            "config" => Ok(OpOutput::ConfigDump {
                text: ctx.config.render(),
            }),
            "info" => self.info().await,
            "shutdown" => Ok(OpOutput::Message {
                text: "daemon stopping".to_string(),
            }),
            "ping" => Ok(OpOutput::Message {
                text: "pong".to_string(),
            }),
            other => Err(Error::Usage(format!("unknown operation '{other}'"))),
        }
    }

    async fn workspace_add(&self, params: WorkspaceParams) -> Result<OpOutput> {
        let root = params
            .root
            .ok_or_else(|| Error::Usage("workspace add needs --root".to_string()))?;
        let canonical = self.ctx.workspaces.add(&root).await?;
        Ok(OpOutput::Message {
            text: format!("added {}", canonical.display()),
        })
    }

    async fn workspace_remove(&self, params: WorkspaceParams) -> Result<OpOutput> {
        let root = params
            .root
            .ok_or_else(|| Error::Usage("workspace remove needs --root".to_string()))?;
        let canonical = self.ctx.workspaces.remove(&root).await?;
        Ok(OpOutput::Message {
            text: format!("removed {}", canonical.display()),
        })
    }

    async fn workspace_restart(&self, params: WorkspaceParams) -> Result<OpOutput> {
        let registry = self.ctx.workspaces.registry();
        let workspaces = match &params.root {
            Some(root) => vec![self.ctx.workspaces.workspace_for(root).await?],
            None => self.ctx.workspaces.all().await,
        };
        for workspace in &workspaces {
            workspace
                .restart(registry, params.language.as_deref())
                .await?;
        }
        Ok(OpOutput::Message {
            text: format!("restarted {} workspace(s)", workspaces.len()),
        })
    }

    async fn info(&self) -> Result<OpOutput> {
        let mut workspaces = Vec::new();
        for workspace in self.ctx.workspaces.all().await {
            workspaces.push(WorkspaceInfo {
                root: workspace.root.to_string_lossy().into_owned(),
                servers: workspace
                    .server_states()
                    .into_iter()
                    .map(|(language, command, state)| {
                        (language, command, format!("{state:?}"))
                    })
                    .collect(),
            });
        }
        Ok(OpOutput::DaemonInfo {
            pid: std::process::id(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            endpoint: self.endpoint.clone(),
            requests: self.requests.load(Ordering::Relaxed),
            symbol_cache_entries: self.ctx.index.len().await,
            hover_cache_entries: self.ctx.hover.len(),
            workspaces,
        })
    }
}

/// Params for the workspace lifecycle operations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceParams {
    /// Workspace root; defaults are resolved CLI-side.
    #[serde(default)]
    pub root: Option<std::path::PathBuf>,
    /// Restrict restart to one language.
    #[serde(default)]
    pub language: Option<String>,
}
