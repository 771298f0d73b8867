//! Workspaces and language-server sessions.
//!
//! A [`Workspace`] owns at most one live [`LanguageServer`] per language.
//! Servers are spawned lazily on first use, initialized with a curated
//! capability set, and torn down with `shutdown`/`exit` plus a grace
//! period before the process is killed.
//!
//! # Document synchronization
//!
//! leta has no editor buffers, so servers see documents through
//! *open-for-operation* semantics: before any file-targeted request the
//! on-disk content hash is compared with the recorded open state, and the
//! document is (re)opened with full current text when they differ.
//! Versions increase monotonically per URI for the lifetime of a server.
//! After a batch of operations the document is closed again to keep
//! servers responsive on large trees.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use lsp_types::notification::{
    DidCloseTextDocument, DidOpenTextDocument, Exit, Initialized,
};
use lsp_types::request::{Initialize, Shutdown};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DocumentSymbolClientCapabilities, DynamicRegistrationClientCapabilities, GotoCapability,
    HoverClientCapabilities, InitializeParams, InitializedParams, MarkupKind,
    PublishDiagnosticsClientCapabilities, RenameClientCapabilities, ServerCapabilities,
    TextDocumentClientCapabilities, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentSyncClientCapabilities, Url, WorkspaceClientCapabilities,
    WorkspaceEditClientCapabilities, WorkspaceFileOperationsClientCapabilities, WorkspaceFolder,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lsp::client::{LspClient, ServerNotification};
use crate::lsp::registry::{Registry, ServerSpec};
use crate::lsp::types::path_to_uri;
use crate::paths;

/// Grace period between `exit` and killing the subprocess.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Hex content hash used for every cache key and sync decision.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Lifecycle states of a language server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Subprocess is being spawned.
    Spawning,
    /// `initialize` is in flight.
    Initializing,
    /// Operations may be dispatched.
    Ready,
    /// A restart is replacing the subprocess.
    Restarting,
    /// Terminal.
    Dead,
}

#[derive(Debug, Clone)]
struct DocState {
    version: i32,
    hash: String,
    open: bool,
}

/// Capabilities handlers gate on before emitting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// `textDocument/documentSymbol`.
    DocumentSymbol,
    /// `textDocument/references`.
    References,
    /// `textDocument/implementation`.
    Implementation,
    /// `textDocument/declaration`.
    Declaration,
    /// `textDocument/prepareTypeHierarchy` and friends.
    TypeHierarchy,
    /// `textDocument/prepareCallHierarchy` and friends.
    CallHierarchy,
    /// `textDocument/rename`.
    Rename,
    /// `textDocument/formatting`.
    Formatting,
    /// `textDocument/codeAction` (organize imports).
    CodeAction,
    /// `workspace/willRenameFiles`.
    WillRenameFiles,
    /// `textDocument/hover`.
    Hover,
}

impl Feature {
    fn capability_name(self) -> &'static str {
        match self {
            Feature::DocumentSymbol => "textDocument/documentSymbol",
            Feature::References => "textDocument/references",
            Feature::Implementation => "textDocument/implementation",
            Feature::Declaration => "textDocument/declaration",
            Feature::TypeHierarchy => "textDocument/typeHierarchy",
            Feature::CallHierarchy => "textDocument/callHierarchy",
            Feature::Rename => "textDocument/rename",
            Feature::Formatting => "textDocument/formatting",
            Feature::CodeAction => "textDocument/codeAction",
            Feature::WillRenameFiles => "workspace/willRenameFiles",
            Feature::Hover => "textDocument/hover",
        }
    }
}

/// One live language server bound to a workspace root.
pub struct LanguageServer {
    /// Language id, as used for `didOpen` and registry lookups.
    pub language: &'static str,
    /// Executable actually launched.
    pub command: String,
    root: PathBuf,
    client: RwLock<Arc<LspClient>>,
    state: std::sync::Mutex<ServerState>,
    capabilities: RwLock<Arc<ServerCapabilities>>,
    docs: DashMap<Url, DocState>,
    versions: DashMap<Url, Arc<AtomicI32>>,
    sync_leases: DashMap<Url, Arc<Mutex<()>>>,
    request_timeout: Duration,
}

impl LanguageServer {
    async fn start(
        spec: &ServerSpec,
        root: &Path,
        request_timeout: Duration,
    ) -> Result<Self> {
        let (command, args) = spec.resolve_command();
        let log = paths::server_log_file(&command).ok();

        let server = Self {
            language: spec.language,
            command: command.clone(),
            root: root.to_path_buf(),
            client: RwLock::new(Arc::new(LspClient::spawn(
                &command,
                &args,
                root,
                log,
                request_timeout,
            )?)),
            state: std::sync::Mutex::new(ServerState::Spawning),
            capabilities: RwLock::new(Arc::new(ServerCapabilities::default())),
            docs: DashMap::new(),
            versions: DashMap::new(),
            sync_leases: DashMap::new(),
            request_timeout,
        };
        server.initialize(spec).await?;
        Ok(server)
    }

    async fn initialize(&self, spec: &ServerSpec) -> Result<()> {
        self.set_state(ServerState::Initializing);
        let client = self.client.read().await.clone();

        let root_uri = Url::from_file_path(&self.root)
            .map_err(|()| Error::Usage(format!("bad workspace root: {}", self.root.display())))?;

        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: self
                    .root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("workspace")
                    .to_string(),
            }]),
            capabilities: curated_capabilities(),
            client_info: Some(ClientInfo {
                name: "leta".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        // Initialization can legitimately take longer than a steady-state
        // request while the server indexes the workspace.
        let result = client
            .request_with_timeout::<Initialize>(params, self.request_timeout * 4)
            .await?;
        *self.capabilities.write().await = Arc::new(result.capabilities);
        client.notify::<Initialized>(InitializedParams {}).await?;

        if spec.quirks.index_grace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(spec.quirks.index_grace_ms)).await;
        }

        self.set_state(ServerState::Ready);
        info!(
            language = self.language,
            command = %self.command,
            root = %self.root.display(),
            "language server ready"
        );
        Ok(())
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        let held = *self.state.lock().unwrap();
        if held == ServerState::Ready && !self.is_alive() {
            ServerState::Dead
        } else {
            held
        }
    }

    fn is_alive(&self) -> bool {
        match self.client.try_read() {
            Ok(client) => client.is_alive(),
            // Being swapped by a restart right now.
            Err(_) => false,
        }
    }

    /// Returns a structured error unless the server advertises `feature`.
    pub async fn require(&self, feature: Feature) -> Result<()> {
        let caps = self.capabilities.read().await.clone();
        if supports(&caps, feature) {
            Ok(())
        } else {
            Err(Error::NotSupported {
                capability: feature.capability_name().to_string(),
                server: self.command.clone(),
            })
        }
    }

    /// Sends a request, mapping death-during-restart to `Restarted`.
    pub async fn request<R>(&self, params: R::Params) -> Result<R::Result>
    where
        R: lsp_types::request::Request,
    {
        match self.state() {
            ServerState::Ready => {}
            ServerState::Restarting => return Err(Error::Restarted),
            ServerState::Dead => return Err(Error::ServerDead(self.command.clone())),
            ServerState::Spawning | ServerState::Initializing => {
                return Err(Error::ServerDead(format!(
                    "{} still initializing",
                    self.command
                )));
            }
        }
        let client = self.client.read().await.clone();
        match client.request::<R>(params).await {
            Err(Error::ServerDead(_)) if self.state() == ServerState::Restarting => {
                Err(Error::Restarted)
            }
            other => other,
        }
    }

    /// Subscribes to this server's notification stream.
    pub async fn notifications(&self) -> tokio::sync::broadcast::Receiver<ServerNotification> {
        self.client.read().await.notifications()
    }

    /// Ensures the server's view of `path` matches the file on disk.
    ///
    /// Returns the document URI and the content hash that is now open.
    /// Holds a per-URI lease so concurrent operations cannot interleave
    /// `didOpen`/`didClose` for the same document.
    pub async fn sync_document(&self, path: &Path) -> Result<(Url, String)> {
        let uri = path_to_uri(path)?;
        let lease = self
            .sync_leases
            .entry(uri.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lease.lock().await;

        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let hash = content_hash(text.as_bytes());

        let needs_close = match self.docs.get(&uri) {
            Some(doc) if doc.open && doc.hash == hash => return Ok((uri, hash)),
            Some(doc) if doc.open => true,
            _ => false,
        };

        let client = self.client.read().await.clone();
        if needs_close {
            client
                .notify::<DidCloseTextDocument>(DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri: uri.clone() },
                })
                .await?;
        }

        let version = self
            .versions
            .entry(uri.clone())
            .or_insert_with(|| Arc::new(AtomicI32::new(0)))
            .clone()
            .fetch_add(1, Ordering::SeqCst)
            + 1;

        client
            .notify::<DidOpenTextDocument>(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: self.language.to_string(),
                    version,
                    text,
                },
            })
            .await?;

        self.docs.insert(
            uri.clone(),
            DocState {
                version,
                hash: hash.clone(),
                open: true,
            },
        );
        Ok((uri, hash))
    }

    /// Closes a document after a batch of operations.
    pub async fn close_document(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path)?;
        let lease = self
            .sync_leases
            .entry(uri.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lease.lock().await;

        let was_open = self
            .docs
            .get(&uri)
            .map(|doc| doc.open)
            .unwrap_or(false);
        if !was_open {
            return Ok(());
        }
        let client = self.client.read().await.clone();
        client
            .notify::<DidCloseTextDocument>(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
            })
            .await?;
        if let Some(mut doc) = self.docs.get_mut(&uri) {
            doc.open = false;
        }
        Ok(())
    }

    /// Recorded (version, hash) for an open document, if any. Used by the
    /// sync invariants tests.
    pub fn open_doc_state(&self, uri: &Url) -> Option<(i32, String)> {
        self.docs
            .get(uri)
            .filter(|doc| doc.open)
            .map(|doc| (doc.version, doc.hash.clone()))
    }

    async fn restart(&self, spec: &ServerSpec) -> Result<()> {
        self.set_state(ServerState::Restarting);
        let old = self.client.read().await.clone();
        // Best-effort graceful stop of the old process; in-flight requests
        // resolve to Restarted via the state check above.
        let _ = old
            .request_with_timeout::<Shutdown>((), Duration::from_secs(2))
            .await;
        let _ = old.notify::<Exit>(()).await;
        old.wait_exit(SHUTDOWN_GRACE).await;
        old.kill().await;

        let (command, args) = spec.resolve_command();
        let log = paths::server_log_file(&command).ok();
        let fresh = Arc::new(LspClient::spawn(
            &command,
            &args,
            &self.root,
            log,
            self.request_timeout,
        )?);
        *self.client.write().await = fresh;
        self.docs.clear();
        self.initialize(spec).await
    }

    async fn stop(&self) {
        self.set_state(ServerState::Dead);
        let client = self.client.read().await.clone();
        let _ = client
            .request_with_timeout::<Shutdown>((), Duration::from_secs(2))
            .await;
        let _ = client.notify::<Exit>(()).await;
        if !client.wait_exit(SHUTDOWN_GRACE).await {
            warn!(command = %self.command, "killed after shutdown grace period");
        }
        client.kill().await;
    }
}

impl std::fmt::Debug for LanguageServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServer")
            .field("language", &self.language)
            .field("command", &self.command)
            .field("root", &self.root)
            .field("state", &self.state())
            .finish()
    }
}

fn curated_capabilities() -> ClientCapabilities {
    // Deliberately minimal: no dynamic registration, no progress
    // reporting, no configuration round-trips, no workspace-folder
    // change notifications. Anything a server pushes back at a headless
    // client is a stall waiting to happen.
    ClientCapabilities {
        workspace: Some(WorkspaceClientCapabilities {
            apply_edit: Some(false),
            workspace_edit: Some(WorkspaceEditClientCapabilities {
                document_changes: Some(true),
                ..Default::default()
            }),
            symbol: Some(lsp_types::WorkspaceSymbolClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            file_operations: Some(WorkspaceFileOperationsClientCapabilities {
                will_rename: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                dynamic_registration: Some(false),
                will_save: Some(false),
                will_save_wait_until: Some(false),
                did_save: Some(false),
            }),
            hover: Some(HoverClientCapabilities {
                dynamic_registration: Some(false),
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
            }),
            references: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: Some(false),
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            definition: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            declaration: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            implementation: Some(GotoCapability {
                dynamic_registration: Some(false),
                link_support: Some(false),
            }),
            call_hierarchy: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            rename: Some(RenameClientCapabilities {
                dynamic_registration: Some(false),
                prepare_support: Some(false),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                version_support: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn supports(caps: &ServerCapabilities, feature: Feature) -> bool {
    use lsp_types::OneOf;
    fn one_of(value: &Option<OneOf<bool, impl Sized>>) -> bool {
        match value {
            Some(OneOf::Left(enabled)) => *enabled,
            Some(OneOf::Right(_)) => true,
            None => false,
        }
    }
    match feature {
        Feature::DocumentSymbol => one_of(&caps.document_symbol_provider),
        Feature::References => one_of(&caps.references_provider),
        Feature::Rename => match &caps.rename_provider {
            Some(OneOf::Left(enabled)) => *enabled,
            Some(OneOf::Right(_)) => true,
            None => false,
        },
        Feature::Formatting => one_of(&caps.document_formatting_provider),
        Feature::Hover => caps.hover_provider.is_some(),
        Feature::Implementation => caps.implementation_provider.is_some(),
        Feature::Declaration => caps.declaration_provider.is_some(),
        Feature::TypeHierarchy => caps.type_hierarchy_provider.is_some(),
        Feature::CallHierarchy => caps.call_hierarchy_provider.is_some(),
        Feature::CodeAction => caps.code_action_provider.is_some(),
        Feature::WillRenameFiles => caps
            .workspace
            .as_ref()
            .and_then(|w| w.file_operations.as_ref())
            .and_then(|f| f.will_rename.as_ref())
            .is_some(),
    }
}

/// One registered project root and its servers.
pub struct Workspace {
    /// Absolute, canonicalized root path.
    pub root: PathBuf,
    servers: DashMap<&'static str, Arc<LanguageServer>>,
    // Serializes spawn/restart; steady-state lookups go through `servers`
    // directly.
    spawn_lock: Mutex<()>,
}

impl Workspace {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            servers: DashMap::new(),
            spawn_lock: Mutex::new(()),
        }
    }

    /// Path relative to this root, for display.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Idempotently spawns and initializes the server for `language`.
    pub async fn ensure(
        &self,
        registry: &Registry,
        language: &str,
        request_timeout: Duration,
    ) -> Result<Arc<LanguageServer>> {
        if let Some(server) = self.servers.get(language)
            && server.state() == ServerState::Ready
        {
            return Ok(server.clone());
        }

        let _guard = self.spawn_lock.lock().await;
        // Re-check under the lock; another task may have won the race.
        if let Some(server) = self.servers.get(language)
            && server.state() == ServerState::Ready
        {
            return Ok(server.clone());
        }

        let spec = registry
            .spec(language)
            .ok_or_else(|| Error::NotSupported {
                capability: format!("language '{language}'"),
                server: "registry".to_string(),
            })?;
        debug!(language, root = %self.root.display(), "spawning language server");
        let server = Arc::new(
            LanguageServer::start(spec, &self.root, request_timeout).await?,
        );
        self.servers.insert(spec.language, server.clone());
        Ok(server)
    }

    /// Restarts one language's server, or all of them.
    pub async fn restart(&self, registry: &Registry, language: Option<&str>) -> Result<()> {
        let _guard = self.spawn_lock.lock().await;
        let targets: Vec<Arc<LanguageServer>> = self
            .servers
            .iter()
            .filter(|entry| language.is_none_or(|l| l == *entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        for server in targets {
            let Some(spec) = registry.spec(server.language) else {
                continue;
            };
            server.restart(spec).await?;
        }
        Ok(())
    }

    /// Shuts down every server in this workspace.
    pub async fn shutdown(&self) {
        let servers: Vec<_> = self
            .servers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.servers.clear();
        for server in servers {
            server.stop().await;
        }
    }

    /// (language, command, state) triples for `daemon info`.
    pub fn server_states(&self) -> Vec<(String, String, ServerState)> {
        self.servers
            .iter()
            .map(|entry| {
                (
                    entry.language.to_string(),
                    entry.command.clone(),
                    entry.state(),
                )
            })
            .collect()
    }
}

/// All registered workspaces, in registration order.
///
/// When roots overlap, the first registered workspace that encloses a
/// file wins; registration order is the tiebreak, so an ordered list
/// rather than a map.
pub struct WorkspaceSet {
    workspaces: RwLock<Vec<Arc<Workspace>>>,
    registry: Registry,
    request_timeout: Duration,
}

impl WorkspaceSet {
    /// Creates an empty set; configured roots are registered separately
    /// by [`register_configured`](Self::register_configured).
    pub fn new(config: &Config) -> Self {
        Self {
            workspaces: RwLock::new(Vec::new()),
            registry: Registry::new(config),
            request_timeout: config.request_timeout(),
        }
    }

    /// Registers the configured roots; missing directories are skipped
    /// with a warning rather than failing daemon startup.
    pub async fn register_configured(&self, config: &Config) {
        for root in &config.workspaces.roots {
            if let Err(e) = self.add(root).await {
                warn!(root = %root.display(), "skipping configured workspace: {e}");
            }
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Adds a workspace root. Idempotent for an already-registered root.
    pub async fn add(&self, root: &Path) -> Result<PathBuf> {
        let canonical = root.canonicalize().map_err(|e| {
            Error::Usage(format!("workspace root '{}': {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(Error::Usage(format!(
                "workspace root is not a directory: {}",
                canonical.display()
            )));
        }
        let mut workspaces = self.workspaces.write().await;
        if !workspaces.iter().any(|w| w.root == canonical) {
            workspaces.push(Arc::new(Workspace::new(canonical.clone())));
        }
        Ok(canonical)
    }

    /// Removes a workspace and shuts down its servers.
    pub async fn remove(&self, root: &Path) -> Result<PathBuf> {
        let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let removed = {
            let mut workspaces = self.workspaces.write().await;
            let index = workspaces
                .iter()
                .position(|w| w.root == canonical)
                .ok_or_else(|| {
                    Error::NotFound(format!("workspace {}", canonical.display()))
                })?;
            workspaces.remove(index)
        };
        removed.shutdown().await;
        Ok(canonical)
    }

    /// Snapshot of all workspaces in registration order.
    pub async fn all(&self) -> Vec<Arc<Workspace>> {
        self.workspaces.read().await.clone()
    }

    /// First registered workspace whose root encloses `path`.
    pub async fn workspace_for(&self, path: &Path) -> Result<Arc<Workspace>> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let workspaces = self.workspaces.read().await;
        workspaces
            .iter()
            .find(|w| canonical.starts_with(&w.root))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no registered workspace contains {}",
                    path.display()
                ))
            })
    }

    /// Workspace + ready server for a file, spawning if needed.
    pub async fn server_for_file(
        &self,
        path: &Path,
    ) -> Result<(Arc<Workspace>, Arc<LanguageServer>)> {
        let workspace = self.workspace_for(path).await?;
        let language = self
            .registry
            .detect_language(path)
            .ok_or_else(|| {
                Error::NotFound(format!("no language server for {}", path.display()))
            })?;
        let server = workspace
            .ensure(&self.registry, language, self.request_timeout)
            .await?;
        Ok((workspace, server))
    }

    /// Shuts down every server in every workspace.
    pub async fn shutdown_all(&self) {
        let workspaces: Vec<_> = {
            let mut guard = self.workspaces.write().await;
            guard.drain(..).collect()
        };
        for workspace in workspaces {
            workspace.shutdown().await;
        }
    }
}
