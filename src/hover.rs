//! The hover cache.
//!
//! Keyed by `(path, line, column, content-hash)`, so an entry can only be
//! read back while the file still hashes the same — stale entries are
//! unreachable rather than invalidated. Byte-budgeted LRU in memory, with
//! a JSON-lines snapshot under the cache directory so warm daemons
//! restart warm.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::workspace::content_hash;

/// Cache key; the hash pins the entry to one file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoverKey {
    /// Absolute file path.
    pub path: PathBuf,
    /// 0-based wire line.
    pub line: u32,
    /// 0-based UTF-16 column.
    pub column: u32,
    /// Content hash of the file when the hover was fetched.
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    key: HoverKey,
    text: String,
}

/// Byte-budgeted, hash-validated hover text cache.
pub struct HoverCache {
    entries: Mutex<(LruCache<HoverKey, String>, usize)>,
    budget: usize,
}

impl HoverCache {
    /// Creates a cache with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            entries: Mutex::new((LruCache::unbounded(), 0)),
            budget,
        }
    }

    /// Hashes the file on disk; shared with the store/load paths so the
    /// validation rule lives in one place.
    pub fn current_hash(path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        Ok(content_hash(&bytes))
    }

    /// Looks up hover text for a position, keyed to the file's *current*
    /// content. Returns `None` on miss or when the file changed.
    pub fn get(&self, path: &Path, line: u32, column: u32) -> Option<String> {
        let hash = Self::current_hash(path).ok()?;
        let key = HoverKey {
            path: path.to_path_buf(),
            line,
            column,
            hash,
        };
        self.entries.lock().unwrap().0.get(&key).cloned()
    }

    /// Stores hover text fetched at the given content hash.
    pub fn put(&self, key: HoverKey, text: String) {
        let size = key.path.as_os_str().len() + key.hash.len() + text.len() + 16;
        let mut guard = self.entries.lock().unwrap();
        let (cache, bytes) = &mut *guard;
        if let Some(old) = cache.put(key, text) {
            *bytes -= old.len().min(*bytes);
        }
        *bytes += size;
        while *bytes > self.budget {
            match cache.pop_lru() {
                Some((evicted_key, evicted)) => {
                    let evicted_size = evicted_key.path.as_os_str().len()
                        + evicted_key.hash.len()
                        + evicted.len()
                        + 16;
                    *bytes -= evicted_size.min(*bytes);
                }
                None => break,
            }
        }
    }

    /// Entry count, for `daemon info`.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().0.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the snapshot file, most-recent entries first.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let guard = self.entries.lock().unwrap();
        let mut lines = String::new();
        for (key, text) in guard.0.iter() {
            let row = SnapshotRow {
                key: key.clone(),
                text: text.clone(),
            };
            if let Ok(json) = serde_json::to_string(&row) {
                lines.push_str(&json);
                lines.push('\n');
            }
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, lines)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Best-effort snapshot load; rows that fail to parse are dropped.
    /// Stale rows cost nothing: their hashes no longer match anything.
    pub fn load(&self, path: &Path) -> usize {
        let Ok(content) = std::fs::read_to_string(path) else {
            return 0;
        };
        let mut loaded = 0;
        // Iterate in reverse so the file's first (most recent) row ends
        // up most recent in the LRU again.
        for line in content.lines().rev() {
            match serde_json::from_str::<SnapshotRow>(line) {
                Ok(row) => {
                    self.put(row.key, row.text);
                    loaded += 1;
                }
                Err(e) => debug!("dropping bad hover snapshot row: {e}"),
            }
        }
        loaded
    }
}

/// Flattens LSP hover contents to displayable text.
pub fn extract_hover_text(contents: lsp_types::HoverContents) -> String {
    use lsp_types::{HoverContents, MarkedString};
    fn marked(ms: MarkedString) -> String {
        match ms {
            MarkedString::String(s) => s,
            MarkedString::LanguageString(ls) => {
                format!("```{}\n{}\n```", ls.language, ls.value)
            }
        }
    }
    match contents {
        HoverContents::Scalar(ms) => marked(ms),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

/// First signature-looking line of a hover blob: code fences stripped,
/// leading blank lines skipped. Used by the replace-function signature
/// check.
pub fn first_signature_line(hover_text: &str) -> String {
    hover_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("```"))
        .unwrap_or("")
        .to_string()
}
