//! Symbol expressions: parsing, matching, disambiguation.
//!
//! Users name symbols with a compact expression instead of coordinates:
//!
//! ```text
//! save                    bare name
//! UserStore.save          qualified tail
//! store.ts:save           path filter (substring or glob) + name
//! store.ts:42:save        path filter + 1-based line + name
//! 42:save                 line + name
//! ```

use std::path::{Path, PathBuf};

use globset::Glob;
use lsp_types::{Position, Range, SymbolKind, Url};

use crate::error::{Candidate, Error, Result};
use crate::index::tree::SymbolTree;
use crate::lsp::types::symbol_kind_name;

/// A parsed symbol expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolExpr {
    /// Original user input, echoed in errors.
    pub raw: String,
    /// Substring or glob over the workspace-relative path.
    pub path_filter: Option<String>,
    /// 1-based line the symbol's name token must start on.
    pub line_filter: Option<u32>,
    /// Qualified name, outermost container first.
    pub name_parts: Vec<String>,
}

impl SymbolExpr {
    /// Parses a user expression.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.to_string();
        let segments: Vec<&str> = input.split(':').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::Usage(format!("empty segment in '{input}'")));
        }

        let (name, rest) = segments.split_last().expect("split always non-empty");

        let mut line_filter = None;
        let mut path_segments = rest;
        if let Some((last, before)) = rest.split_last()
            && last.chars().all(|c| c.is_ascii_digit())
        {
            let line: u32 = last
                .parse()
                .map_err(|_| Error::Usage(format!("line number out of range in '{input}'")))?;
            if line == 0 {
                return Err(Error::Usage("line numbers are 1-based".to_string()));
            }
            line_filter = Some(line);
            path_segments = before;
        }

        let path_filter = if path_segments.is_empty() {
            None
        } else {
            Some(path_segments.join(":"))
        };

        let name_parts: Vec<String> = name.split('.').map(str::to_string).collect();
        if name_parts.iter().any(String::is_empty) {
            return Err(Error::Usage(format!("malformed symbol name in '{input}'")));
        }

        Ok(Self {
            raw,
            path_filter,
            line_filter,
            name_parts,
        })
    }

    /// Whether a workspace-relative path passes the path filter.
    pub fn matches_path(&self, relative: &Path) -> bool {
        self.path_filter
            .as_deref()
            .is_none_or(|filter| path_filter_matches(filter, relative))
    }
}

/// Shared path-filter semantics: substring of the relative path, or a
/// glob when the filter contains `*`/`?`. Used by symbol expressions and
/// by `grep`'s positional path argument.
pub fn path_filter_matches(filter: &str, relative: &Path) -> bool {
    if filter.contains('*') || filter.contains('?') {
        // Globs anchor anywhere in the tree unless they contain '/'.
        let pattern = if filter.contains('/') {
            filter.to_string()
        } else {
            format!("**/{filter}")
        };
        Glob::new(&pattern)
            .map(|g| g.compile_matcher().is_match(relative))
            .unwrap_or(false)
    } else {
        relative.to_string_lossy().contains(filter)
    }
}

/// A symbol expression resolved to a unique location.
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    /// Document URI.
    pub uri: Url,
    /// Absolute path of the defining file.
    pub path: PathBuf,
    /// Workspace-relative path, for display.
    pub relative_path: PathBuf,
    /// Symbol name.
    pub name: String,
    /// Dot-joined qualified name.
    pub qualified: String,
    /// LSP symbol kind.
    pub kind: SymbolKind,
    /// Full extent of the symbol.
    pub range: Range,
    /// The name token.
    pub selection_range: Range,
}

impl ResolvedSymbol {
    /// Wire position of the name token; the anchor for every follow-up
    /// request (hover, references, call hierarchy).
    pub fn anchor(&self) -> Position {
        self.selection_range.start
    }

    fn to_candidate(&self) -> Candidate {
        Candidate {
            qualified: self.qualified.clone(),
            path: self.relative_path.to_string_lossy().into_owned(),
            line: self.selection_range.start.line + 1,
            kind: symbol_kind_name(self.kind).to_string(),
        }
    }
}

/// Matches an expression against one file's tree. The caller supplies the
/// workspace-relative path for filtering and display.
pub fn match_in_tree(
    expr: &SymbolExpr,
    tree: &SymbolTree,
    relative: &Path,
) -> Vec<ResolvedSymbol> {
    if !expr.matches_path(relative) {
        return Vec::new();
    }
    let path = tree.uri.to_file_path().unwrap_or_default();

    let mut matches = Vec::new();
    for (index, node) in tree.nodes().iter().enumerate() {
        if let Some(line) = expr.line_filter
            && node.selection_range.start.line + 1 != line
        {
            continue;
        }

        // The tail of containerPath + name must equal the expression's
        // name parts.
        let mut qualified_parts = tree.container_path(index);
        qualified_parts.push(node.name.clone());
        if qualified_parts.len() < expr.name_parts.len() {
            continue;
        }
        let tail = &qualified_parts[qualified_parts.len() - expr.name_parts.len()..];
        if tail != expr.name_parts.as_slice() {
            continue;
        }

        matches.push(ResolvedSymbol {
            uri: tree.uri.clone(),
            path: path.clone(),
            relative_path: relative.to_path_buf(),
            name: node.name.clone(),
            qualified: qualified_parts.join("."),
            kind: node.kind,
            range: node.range,
            selection_range: node.selection_range,
        });
    }
    matches
}

/// Kinds users usually mean when a name collides with its backing
/// variable.
const TYPE_KINDS: &[SymbolKind] = &[
    SymbolKind::CLASS,
    SymbolKind::STRUCT,
    SymbolKind::INTERFACE,
    SymbolKind::ENUM,
];

const VALUE_KINDS: &[SymbolKind] = &[
    SymbolKind::VARIABLE,
    SymbolKind::FIELD,
    SymbolKind::CONSTANT,
];

/// Reduces a candidate list to a unique winner or a structured error.
pub fn disambiguate(expr: &SymbolExpr, mut candidates: Vec<ResolvedSymbol>) -> Result<ResolvedSymbol> {
    if candidates.is_empty() {
        return Err(Error::NotFound(expr.raw.clone()));
    }
    if candidates.len() > 1 {
        let has_type = candidates.iter().any(|c| TYPE_KINDS.contains(&c.kind));
        let has_value = candidates.iter().any(|c| VALUE_KINDS.contains(&c.kind));
        if has_type && has_value {
            candidates.retain(|c| !VALUE_KINDS.contains(&c.kind));
        }
    }
    if candidates.len() == 1 {
        return Ok(candidates.pop().expect("len checked"));
    }
    Err(Error::Ambiguous {
        expr: expr.raw.clone(),
        candidates: candidates.iter().map(ResolvedSymbol::to_candidate).collect(),
    })
}
