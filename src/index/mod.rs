//! The symbol index: per-file document-symbol trees, cached by content
//! hash, plus workspace-wide collection.
//!
//! A cache hit is byte-identical to a fresh query under the same content:
//! the key is `(uri, content-hash)`, so an out-of-band file change simply
//! misses. Misses on distinct files proceed in parallel; a per-URI guard
//! keeps two misses on the *same* file from issuing duplicate requests.

pub mod resolver;
pub mod tree;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use lru::LruCache;
use lsp_types::request::DocumentSymbolRequest;
use lsp_types::{
    DocumentSymbolParams, DocumentSymbolResponse, PartialResultParams, TextDocumentIdentifier,
    Url, WorkDoneProgressParams,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::workspace::{Feature, WorkspaceSet};

pub use tree::{SymbolNode, SymbolTree};

/// Builds a glob set from user patterns; bare names match anywhere.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let expanded = if pattern.contains('/') || pattern.contains("**") {
            pattern.clone()
        } else {
            format!("**/{pattern}")
        };
        let glob = Glob::new(&expanded)
            .map_err(|e| Error::Usage(format!("bad glob '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Usage(format!("bad glob set: {e}")))
}

/// Files that cap concurrent documentSymbol fan-out per collection.
const COLLECT_CONCURRENCY: usize = 8;

type CacheKey = (Url, String);

/// Byte-budgeted LRU of symbol trees.
pub struct SymbolIndex {
    cache: Mutex<(LruCache<CacheKey, Arc<SymbolTree>>, usize)>,
    budget: usize,
    inflight: DashMap<Url, Arc<Mutex<()>>>,
}

impl SymbolIndex {
    /// Creates an index with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            cache: Mutex::new((LruCache::unbounded(), 0)),
            budget,
            inflight: DashMap::new(),
        }
    }

    /// Cached entry count, for `daemon info`.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.0.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The symbol tree for one file at its current on-disk content.
    pub async fn tree_for_file(
        &self,
        workspaces: &WorkspaceSet,
        path: &Path,
    ) -> Result<Arc<SymbolTree>> {
        let (_, server) = workspaces.server_for_file(path).await?;
        server.require(Feature::DocumentSymbol).await?;

        // Per-URI guard: concurrent misses on the same file collapse into
        // one request; distinct files proceed in parallel.
        let uri_guard = {
            let uri = crate::lsp::types::path_to_uri(path)?;
            self.inflight
                .entry(uri)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = uri_guard.lock().await;

        let (uri, hash) = server.sync_document(path).await?;
        let key = (uri.clone(), hash.clone());

        if let Some(tree) = self.cache.lock().await.0.get(&key) {
            return Ok(tree.clone());
        }

        let response = server
            .request::<DocumentSymbolRequest>(DocumentSymbolParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            })
            .await?
            .unwrap_or(DocumentSymbolResponse::Nested(vec![]));

        let tree = Arc::new(SymbolTree::from_response(uri, hash, response));
        self.insert(key, tree.clone()).await;
        // The tree is cached; keep the server's open-document set small.
        let _ = server.close_document(path).await;
        Ok(tree)
    }

    async fn insert(&self, key: CacheKey, tree: Arc<SymbolTree>) {
        let mut guard = self.cache.lock().await;
        let (cache, bytes) = &mut *guard;
        let size = tree.approx_bytes();
        if let Some(old) = cache.put(key, tree) {
            *bytes -= old.approx_bytes().min(*bytes);
        }
        *bytes += size;
        while *bytes > self.budget {
            match cache.pop_lru() {
                Some((_, evicted)) => *bytes -= evicted.approx_bytes().min(*bytes),
                None => break,
            }
        }
    }

    /// Collects symbol trees for every analyzable file under every
    /// workspace root (or just those matching `paths_filter`).
    ///
    /// Transient per-file failures do not abort the sweep; affected files
    /// are reported in the returned warnings.
    pub async fn collect_workspace(
        self: &Arc<Self>,
        workspaces: &Arc<WorkspaceSet>,
        extra_excludes: &[String],
        file_filter: Option<&GlobSet>,
    ) -> Result<(Vec<Arc<SymbolTree>>, Vec<String>)> {
        let mut files = Vec::new();
        for workspace in workspaces.all().await {
            for path in enumerate_source_files_blocking(&workspace.root, extra_excludes).await? {
                if workspaces.registry().detect_language(&path).is_none() {
                    continue;
                }
                if let Some(filter) = file_filter {
                    let relative = workspace.relative(&path);
                    if !filter.is_match(&relative) && !filter.is_match(&path) {
                        continue;
                    }
                }
                files.push(path);
            }
        }

        let mut trees = Vec::new();
        let mut warnings = Vec::new();
        let mut pending = files.into_iter();
        let mut join_set = tokio::task::JoinSet::new();

        loop {
            while join_set.len() < COLLECT_CONCURRENCY
                && let Some(path) = pending.next()
            {
                let index = self.clone();
                let workspaces = workspaces.clone();
                join_set.spawn(async move {
                    let result = index.tree_for_file(&workspaces, &path).await;
                    (path, result)
                });
            }
            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let Ok((path, result)) = joined else {
                continue;
            };
            match result {
                Ok(tree) => trees.push(tree),
                Err(e) if e.is_transient() => {
                    warnings.push(format!("{}: {e}", path.display()));
                }
                Err(Error::NotSupported { .. }) | Err(Error::NotFound(_)) => {
                    // No server for this file; skip silently.
                    debug!(path = %path.display(), "skipped during collection");
                }
                Err(e) => {
                    warnings.push(format!("{}: {e}", path.display()));
                }
            }
        }

        Ok((trees, warnings))
    }
}

/// [`enumerate_source_files`] on the blocking pool; directory walks over
/// large trees should not stall the event loop.
pub async fn enumerate_source_files_blocking(
    root: &Path,
    extra_excludes: &[String],
) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let excludes = extra_excludes.to_vec();
    tokio::task::spawn_blocking(move || enumerate_source_files(&root, &excludes))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("walker task failed: {e}"))))?
}

/// Walks a root respecting VCS ignore rules and user excludes.
pub fn enumerate_source_files(root: &Path, extra_excludes: &[String]) -> Result<Vec<PathBuf>> {
    let excludes = if extra_excludes.is_empty() {
        None
    } else {
        Some(build_globset(extra_excludes)?)
    };

    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_exclude(true)
        .build()
    {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.into_path();
        if let Some(excludes) = &excludes {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if excludes.is_match(relative) {
                continue;
            }
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range, SymbolKind};

    #[allow(deprecated)]
    fn tree_of_size(uri: &str, names: &[&str]) -> Arc<SymbolTree> {
        let nodes = names
            .iter()
            .map(|name| lsp_types::DocumentSymbol {
                name: (*name).to_string(),
                detail: None,
                kind: SymbolKind::FUNCTION,
                tags: None,
                deprecated: None,
                range: Range {
                    start: Position {
                        line: 0,
                        character: 0,
                    },
                    end: Position {
                        line: 1,
                        character: 0,
                    },
                },
                selection_range: Range {
                    start: Position {
                        line: 0,
                        character: 0,
                    },
                    end: Position {
                        line: 0,
                        character: 4,
                    },
                },
                children: None,
            })
            .collect();
        Arc::new(SymbolTree::from_response(
            Url::parse(uri).unwrap(),
            "hash".into(),
            DocumentSymbolResponse::Nested(nodes),
        ))
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_lru() {
        let one = tree_of_size("file:///a.rs", &["alpha"]);
        let budget = one.approx_bytes() * 2 + one.approx_bytes() / 2;
        let index = SymbolIndex::new(budget);

        index
            .insert((one.uri.clone(), "1".into()), one.clone())
            .await;
        index
            .insert(
                (Url::parse("file:///b.rs").unwrap(), "2".into()),
                tree_of_size("file:///b.rs", &["beta"]),
            )
            .await;
        assert_eq!(index.len().await, 2);

        // Third insert exceeds the budget; the LRU entry goes.
        index
            .insert(
                (Url::parse("file:///c.rs").unwrap(), "3".into()),
                tree_of_size("file:///c.rs", &["gamma"]),
            )
            .await;
        assert_eq!(index.len().await, 2);
        let mut guard = index.cache.lock().await;
        assert!(guard.0.get(&(one.uri.clone(), "1".into())).is_none());
    }

    #[test]
    fn test_enumerate_respects_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("gen.rs"), "").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let files = enumerate_source_files(dir.path(), &[]).unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert!(names.contains(&"main.rs"));
        assert!(!names.contains(&"gen.rs"));
    }

    #[test]
    fn test_enumerate_applies_extra_excludes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.rs"), "").unwrap();
        std::fs::write(dir.path().join("skip_test.rs"), "").unwrap();

        let files =
            enumerate_source_files(dir.path(), &["*_test.rs".to_string()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert!(names.contains(&"keep.rs"));
        assert!(!names.contains(&"skip_test.rs"));
    }

    #[test]
    fn test_build_globset_bare_names_match_anywhere() {
        let set = build_globset(&["node_modules".to_string()]).unwrap();
        assert!(set.is_match("a/b/node_modules"));
        assert!(!set.is_match("a/b/src"));
    }
}
