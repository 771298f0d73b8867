//! Operation handlers.
//!
//! Every operation follows the same shape: parse typed params, resolve
//! targets through the symbol index, gate on server capabilities, call
//! the LSP primitive, and return a typed [`OpOutput`] variant. Variants
//! render themselves for plain output; JSON output is their serde form.
//! Aggregates report per-file transient failures in `warnings` instead of
//! aborting.

pub mod calls;
pub mod diagnostics;
pub mod edit;
pub mod files;
pub mod grep;
pub mod navigate;
pub mod show;

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use lsp_types::request::HoverRequest;
use lsp_types::{HoverParams, Position, TextDocumentPositionParams, Url, WorkDoneProgressParams};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::hover::{HoverCache, HoverKey, extract_hover_text};
use crate::index::SymbolIndex;
use crate::index::resolver::{ResolvedSymbol, SymbolExpr, disambiguate, match_in_tree};
use crate::lsp::types::{symbol_kind_name, uri_to_path, utf16_col_to_byte};
use crate::workspace::{Feature, WorkspaceSet};

/// Shared state handed to every handler.
pub struct OpContext {
    /// Registered workspaces and their servers.
    pub workspaces: Arc<WorkspaceSet>,
    /// Symbol tree cache.
    pub index: Arc<SymbolIndex>,
    /// Hover cache.
    pub hover: Arc<HoverCache>,
    /// Effective configuration.
    pub config: Config,
}

impl OpContext {
    /// Builds the context from configuration.
    pub fn new(config: Config) -> Self {
        Self {
            workspaces: Arc::new(WorkspaceSet::new(&config)),
            index: Arc::new(SymbolIndex::new(config.daemon.symbol_cache_bytes)),
            hover: Arc::new(HoverCache::new(config.daemon.hover_cache_bytes)),
            config,
        }
    }

    /// Resolves a symbol expression to a unique location, or returns
    /// `NotFound`/`Ambiguous`.
    pub async fn resolve(&self, expr_str: &str) -> Result<ResolvedSymbol> {
        let expr = SymbolExpr::parse(expr_str)?;
        let (trees, _warnings) = self
            .index
            .collect_workspace(&self.workspaces, &self.config.workspaces.exclude, None)
            .await?;

        let mut candidates = Vec::new();
        for tree in &trees {
            let path = uri_to_path(&tree.uri)?;
            let Ok(workspace) = self.workspaces.workspace_for(&path).await else {
                continue;
            };
            candidates.extend(match_in_tree(&expr, tree, &workspace.relative(&path)));
        }
        disambiguate(&expr, candidates)
    }

    /// Hover text at a wire position, through the cache.
    pub async fn hover_text(&self, path: &Path, position: Position) -> Result<Option<String>> {
        if let Some(cached) = self.hover.get(path, position.line, position.character) {
            return Ok(Some(cached));
        }

        let (_, server) = self.workspaces.server_for_file(path).await?;
        server.require(Feature::Hover).await?;
        let (uri, hash) = server.sync_document(path).await?;

        let response = server
            .request::<HoverRequest>(HoverParams {
                text_document_position_params: TextDocumentPositionParams {
                    text_document: lsp_types::TextDocumentIdentifier { uri },
                    position,
                },
                work_done_progress_params: WorkDoneProgressParams::default(),
            })
            .await?;

        let _ = server.close_document(path).await;
        let Some(hover) = response else {
            return Ok(None);
        };
        let text = extract_hover_text(hover.contents);
        self.hover.put(
            HoverKey {
                path: path.to_path_buf(),
                line: position.line,
                column: position.character,
                hash,
            },
            text.clone(),
        );
        Ok(Some(text))
    }

    /// Display path for a location: workspace-relative when possible.
    pub async fn display_path(&self, path: &Path) -> String {
        match self.workspaces.workspace_for(path).await {
            Ok(workspace) => workspace.relative(path).to_string_lossy().into_owned(),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

/// One rendered source location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationItem {
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based byte column.
    pub column: u32,
    /// Context lines (with the `>` marker on the target line).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl LocationItem {
    /// Builds an item from a wire location, converting the UTF-16 column
    /// to a byte column against the actual line text.
    pub async fn from_wire(
        ctx: &OpContext,
        uri: &Url,
        position: Position,
        context_lines: usize,
    ) -> Result<Self> {
        let path = uri_to_path(uri)?;
        let text = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        let line_text = text.lines().nth(position.line as usize).unwrap_or("");
        let byte_col = utf16_col_to_byte(line_text, position.character);

        let context = if context_lines > 0 {
            read_context(&text, position.line, context_lines)
        } else {
            Vec::new()
        };

        Ok(Self {
            path: ctx.display_path(&path).await,
            line: position.line + 1,
            column: byte_col as u32 + 1,
            context,
        })
    }
}

/// Numbered context lines around a 0-based target line, with a marker.
pub fn read_context(text: &str, line: u32, context: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let target = line as usize;
    let start = target.saturating_sub(context);
    let end = (target + context + 1).min(lines.len());

    (start..end)
        .map(|idx| {
            let marker = if idx == target { ">" } else { " " };
            format!("{marker} {:4} | {}", idx + 1, lines[idx])
        })
        .collect()
}

/// One grep match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepItem {
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line of the name token.
    pub line: u32,
    /// Symbol name.
    pub name: String,
    /// Kind name (lowercase).
    pub kind: String,
    /// Dot-joined container path, empty for top-level symbols.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container: String,
    /// Hover docs when requested with `-d`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
}

/// One diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based byte column.
    pub column: u32,
    /// Severity name: error, warning, information, hint.
    pub severity: String,
    /// Producing tool, when reported.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Message text.
    pub message: String,
}

/// A node in a rendered call tree or call path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallNode {
    /// Symbol name.
    pub name: String,
    /// Kind name.
    pub kind: String,
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line.
    pub line: u32,
    /// Depth in the traversal (0 for the root).
    pub depth: u32,
}

/// Per-workspace server summary for `daemon info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Root path.
    pub root: String,
    /// (language, command, state) per live server.
    pub servers: Vec<(String, String, String)>,
}

/// The tagged result sum. Every operation returns exactly one variant;
/// JSON mode serializes it as-is, plain mode uses [`OpOutput::render_plain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpOutput {
    /// Location lists: refs, implementations, declaration, sub/supertypes.
    Locations {
        /// The locations.
        items: Vec<LocationItem>,
        /// Per-file transient failures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    /// Grep results.
    Grep {
        /// Matches in workspace order.
        items: Vec<GrepItem>,
        /// Per-file transient failures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    /// A symbol body slab.
    Show {
        /// `path:start-end` header.
        header: String,
        /// Body text.
        text: String,
    },
    /// Hover text.
    Hover {
        /// Flattened hover contents.
        text: String,
    },
    /// Call tree from `calls --from` or `calls --to`.
    CallTree {
        /// `from` or `to`.
        direction: String,
        /// Nodes in breadth-first order; `depth` encodes the tree shape.
        nodes: Vec<CallNode>,
    },
    /// Shortest call path from `calls --from X --to Y`.
    CallPath {
        /// Nodes from source to target inclusive.
        nodes: Vec<CallNode>,
    },
    /// Diagnostics listing.
    Diagnostics {
        /// Diagnostics in path order.
        items: Vec<DiagnosticItem>,
        /// Per-file transient failures.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    /// Files touched by an edit operation.
    EditedFiles {
        /// What happened, e.g. `renamed` or `formatted`.
        action: String,
        /// Workspace-relative paths.
        files: Vec<String>,
    },
    /// replace-function result.
    Replaced {
        /// Lines in the new body.
        lines: usize,
    },
    /// File enumeration for `files`.
    FileList {
        /// Workspace-relative paths in sorted order.
        files: Vec<String>,
    },
    /// Daemon status.
    DaemonInfo {
        /// Daemon PID.
        pid: u32,
        /// Seconds since start.
        uptime_secs: u64,
        /// IPC endpoint.
        endpoint: String,
        /// Requests served.
        requests: u64,
        /// Symbol cache entries.
        symbol_cache_entries: usize,
        /// Hover cache entries.
        hover_cache_entries: usize,
        /// Per-workspace summaries.
        workspaces: Vec<WorkspaceInfo>,
    },
    /// Effective configuration as TOML.
    ConfigDump {
        /// Rendered TOML.
        text: String,
    },
    /// A plain acknowledgement.
    Message {
        /// Text shown to the user.
        text: String,
    },
}

impl OpOutput {
    /// Warnings attached to aggregate results, printed to stderr.
    pub fn warnings(&self) -> &[String] {
        match self {
            OpOutput::Locations { warnings, .. }
            | OpOutput::Grep { warnings, .. }
            | OpOutput::Diagnostics { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// Human-readable rendering.
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        match self {
            OpOutput::Locations { items, .. } => {
                for item in items {
                    let _ = writeln!(out, "{}:{}:{}", item.path, item.line, item.column);
                    for line in &item.context {
                        let _ = writeln!(out, "{line}");
                    }
                }
            }
            OpOutput::Grep { items, .. } => {
                for item in items {
                    let _ = writeln!(
                        out,
                        "{}:{} [{}] {}",
                        item.path,
                        item.line,
                        capitalize(&item.kind),
                        item.name
                    );
                    if let Some(docs) = &item.docs {
                        for line in docs.lines() {
                            let _ = writeln!(out, "    {line}");
                        }
                    }
                }
            }
            OpOutput::Show { header, text } => {
                let _ = writeln!(out, "{header}");
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            OpOutput::Hover { text } => {
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            OpOutput::CallTree { nodes, .. } => {
                for node in nodes {
                    let indent = "  ".repeat(node.depth as usize);
                    let _ = writeln!(
                        out,
                        "{indent}{} [{}] {}:{}",
                        node.name, node.kind, node.path, node.line
                    );
                }
            }
            OpOutput::CallPath { nodes } => {
                for (idx, node) in nodes.iter().enumerate() {
                    let arrow = if idx == 0 { "" } else { "-> " };
                    let _ = writeln!(
                        out,
                        "{arrow}{} [{}] {}:{}",
                        node.name, node.kind, node.path, node.line
                    );
                }
            }
            OpOutput::Diagnostics { items, .. } => {
                for item in items {
                    let source = if item.source.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", item.source)
                    };
                    let _ = writeln!(
                        out,
                        "{}:{}:{} {}{} {}",
                        item.path, item.line, item.column, item.severity, source, item.message
                    );
                }
            }
            OpOutput::EditedFiles { action, files } => {
                if files.is_empty() {
                    let _ = writeln!(out, "{action}: no files changed");
                } else {
                    for file in files {
                        let _ = writeln!(out, "{file}");
                    }
                }
            }
            OpOutput::Replaced { lines } => {
                let _ = writeln!(out, "replaced {lines} lines");
            }
            OpOutput::FileList { files } => {
                for file in files {
                    let _ = writeln!(out, "{file}");
                }
            }
            OpOutput::DaemonInfo {
                pid,
                uptime_secs,
                endpoint,
                requests,
                symbol_cache_entries,
                hover_cache_entries,
                workspaces,
            } => {
                let _ = writeln!(out, "pid: {pid}");
                let _ = writeln!(out, "uptime: {uptime_secs}s");
                let _ = writeln!(out, "endpoint: {endpoint}");
                let _ = writeln!(out, "requests: {requests}");
                let _ = writeln!(
                    out,
                    "caches: {symbol_cache_entries} symbol trees, {hover_cache_entries} hovers"
                );
                for workspace in workspaces {
                    let _ = writeln!(out, "workspace {}", workspace.root);
                    for (language, command, state) in &workspace.servers {
                        let _ = writeln!(out, "  {language}: {command} ({state})");
                    }
                }
            }
            OpOutput::ConfigDump { text } => out.push_str(text),
            OpOutput::Message { text } => {
                let _ = writeln!(out, "{text}");
            }
        }
        out
    }
}

fn capitalize(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Flattens a goto-style response into locations.
pub fn goto_response_locations(
    response: Option<lsp_types::GotoDefinitionResponse>,
) -> Vec<lsp_types::Location> {
    match response {
        Some(lsp_types::GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(lsp_types::GotoDefinitionResponse::Array(locations)) => locations,
        Some(lsp_types::GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| lsp_types::Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
        None => Vec::new(),
    }
}

/// Standard helper: symbol kind as a lowercase display string.
pub fn kind_name(kind: lsp_types::SymbolKind) -> String {
    symbol_kind_name(kind).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_context_marks_target() {
        let text = "a\nb\nc\nd\ne\n";
        let lines = read_context(text, 2, 1);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("  "));
        assert!(lines[1].starts_with(">"));
        assert!(lines[1].contains("| c"));
    }

    #[test]
    fn test_read_context_clamps_at_edges() {
        let text = "only\n";
        let lines = read_context(text, 0, 5);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_grep_render_matches_contract() {
        let output = OpOutput::Grep {
            items: vec![GrepItem {
                path: "server/handler.go".into(),
                line: 14,
                name: "UserHandler".into(),
                kind: "struct".into(),
                container: String::new(),
                docs: None,
            }],
            warnings: vec![],
        };
        assert_eq!(
            output.render_plain(),
            "server/handler.go:14 [Struct] UserHandler\n"
        );
    }

    #[test]
    fn test_show_render_has_header_then_body() {
        let output = OpOutput::Show {
            header: "main.py:3-6".into(),
            text: "def create_sample_user():\n    return User()\n".into(),
        };
        let plain = output.render_plain();
        assert!(plain.starts_with("main.py:3-6\n"));
        assert!(plain.ends_with("return User()\n"));
    }

    #[test]
    fn test_json_round_trip_of_output() {
        let output = OpOutput::Locations {
            items: vec![LocationItem {
                path: "src/a.rs".into(),
                line: 3,
                column: 5,
                context: vec![],
            }],
            warnings: vec!["x".into()],
        };
        let json = serde_json::to_string(&output).unwrap();
        let back: OpOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.warnings(), &["x".to_string()]);
        assert!(json.contains("\"type\":\"locations\""));
    }
}
