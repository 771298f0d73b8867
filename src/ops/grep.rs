//! `grep` — regex search over symbol names across all workspaces.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::resolver::path_filter_matches;
use crate::lsp::types::{parse_symbol_kinds, uri_to_path};
use crate::ops::{GrepItem, OpContext, OpOutput, kind_name};

/// Parameters for `grep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepParams {
    /// Regex matched against symbol names only.
    pub pattern: String,
    /// Optional path filter (substring or glob, per symbol-expression
    /// rules).
    #[serde(default)]
    pub path: Option<String>,
    /// Kind names intersected with the match set.
    #[serde(default)]
    pub kinds: Vec<String>,
    /// Exclude globs applied to workspace-relative paths.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Case-insensitive matching.
    #[serde(default)]
    pub case_insensitive: bool,
    /// Attach hover docs to each match.
    #[serde(default)]
    pub docs: bool,
    /// Keep only the first N matches.
    #[serde(default)]
    pub head: Option<usize>,
}

/// Runs `grep`.
pub async fn grep(ctx: &OpContext, params: GrepParams) -> Result<OpOutput> {
    let regex = RegexBuilder::new(&params.pattern)
        .case_insensitive(params.case_insensitive)
        .build()
        .map_err(|e| Error::Usage(format!("bad pattern '{}': {e}", params.pattern)))?;

    let mut kind_set = Vec::new();
    for name in &params.kinds {
        kind_set.extend(parse_symbol_kinds(name)?);
    }

    let mut excludes = ctx.config.workspaces.exclude.clone();
    excludes.extend(params.exclude.iter().cloned());

    let (trees, warnings) = ctx
        .index
        .collect_workspace(&ctx.workspaces, &excludes, None)
        .await?;

    let mut items = Vec::new();
    'trees: for tree in &trees {
        let path = uri_to_path(&tree.uri)?;
        let Ok(workspace) = ctx.workspaces.workspace_for(&path).await else {
            continue;
        };
        let relative = workspace.relative(&path);
        if let Some(filter) = &params.path
            && !path_filter_matches(filter, &relative)
        {
            continue;
        }

        for (index, node) in tree.nodes().iter().enumerate() {
            if !regex.is_match(&node.name) {
                continue;
            }
            if !kind_set.is_empty() && !kind_set.contains(&node.kind) {
                continue;
            }
            items.push(GrepItem {
                path: relative.to_string_lossy().into_owned(),
                line: node.selection_range.start.line + 1,
                name: node.name.clone(),
                kind: kind_name(node.kind),
                container: tree.container_path(index).join("."),
                docs: None,
            });
            if let Some(head) = params.head
                && items.len() >= head
            {
                break 'trees;
            }
        }
    }

    items.sort_by(|a, b| (&a.path, a.line).cmp(&(&b.path, b.line)));

    if params.docs {
        attach_docs(ctx, &trees, &mut items).await;
    }

    Ok(OpOutput::Grep { items, warnings })
}

/// Fetches hover docs for each match through the hover cache. Failures
/// leave `docs` empty rather than failing the whole grep.
async fn attach_docs(
    ctx: &OpContext,
    trees: &[std::sync::Arc<crate::index::SymbolTree>],
    items: &mut [GrepItem],
) {
    for item in items.iter_mut() {
        // Recover the wire position from the tree the item came from.
        let position = trees.iter().find_map(|tree| {
            let path = uri_to_path(&tree.uri).ok()?;
            if !path.ends_with(&item.path) {
                return None;
            }
            tree.nodes()
                .iter()
                .find(|n| n.selection_range.start.line + 1 == item.line && n.name == item.name)
                .map(|n| (path.clone(), n.selection_range.start))
        });
        let Some((path, position)) = position else {
            continue;
        };
        if let Ok(Some(text)) = ctx.hover_text(&path, position).await {
            item.docs = Some(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_deserialize_defaults() {
        let params: GrepParams = serde_json::from_str(r#"{"pattern": "Handler$"}"#).unwrap();
        assert!(!params.case_insensitive);
        assert!(params.kinds.is_empty());
        assert!(params.head.is_none());
    }

    #[test]
    fn test_bad_pattern_is_usage_error() {
        let regex = RegexBuilder::new("[unclosed").build();
        assert!(regex.is_err());
    }
}
