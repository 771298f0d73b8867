//! `calls` — call-hierarchy traversal.
//!
//! `--from` walks outgoing calls (callees), `--to` walks incoming calls
//! (callers); both together search for the shortest call path from one
//! symbol to the other. Traversal is breadth-first with each callable
//! visited once, so ties resolve to the first-discovered path. Locations
//! outside every registered workspace are skipped unless
//! `--include-non-workspace` is set.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use lsp_types::request::{
    CallHierarchyIncomingCalls, CallHierarchyOutgoingCalls, CallHierarchyPrepare,
};
use lsp_types::{
    CallHierarchyIncomingCallsParams, CallHierarchyItem, CallHierarchyOutgoingCallsParams,
    CallHierarchyPrepareParams, PartialResultParams, Position, TextDocumentIdentifier,
    TextDocumentPositionParams, Url, WorkDoneProgressParams,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lsp::types::uri_to_path;
use crate::ops::{CallNode, OpContext, OpOutput, kind_name};
use crate::workspace::{Feature, LanguageServer};

fn default_depth() -> u32 {
    3
}

/// Parameters for `calls`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsParams {
    /// Walk callees starting here.
    #[serde(default)]
    pub from: Option<String>,
    /// Walk callers starting here.
    #[serde(default)]
    pub to: Option<String>,
    /// Maximum edge distance from the root.
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    /// Include call sites outside every registered workspace.
    #[serde(default)]
    pub include_non_workspace: bool,
}

/// Runs `calls`.
pub async fn calls(ctx: &OpContext, params: CallsParams) -> Result<OpOutput> {
    match (&params.from, &params.to) {
        (Some(from), Some(to)) => path_between(ctx, &params, from, to).await,
        (Some(from), None) => {
            walk(ctx, &params, from, Direction::Outgoing)
                .await
                .map(|nodes| OpOutput::CallTree {
                    direction: "from".to_string(),
                    nodes,
                })
        }
        (None, Some(to)) => {
            walk(ctx, &params, to, Direction::Incoming)
                .await
                .map(|nodes| OpOutput::CallTree {
                    direction: "to".to_string(),
                    nodes,
                })
        }
        (None, None) => Err(Error::Usage(
            "calls needs --from, --to, or both".to_string(),
        )),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Outgoing,
    Incoming,
}

/// Key identifying one callable across the traversal.
fn item_key(item: &CallHierarchyItem) -> (Url, u32, u32) {
    (
        item.uri.clone(),
        item.selection_range.start.line,
        item.selection_range.start.character,
    )
}

async fn prepare_root(
    ctx: &OpContext,
    expr: &str,
) -> Result<(Arc<LanguageServer>, CallHierarchyItem)> {
    let symbol = ctx.resolve(expr).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::CallHierarchy).await?;
    let (uri, _) = server.sync_document(&symbol.path).await?;

    let items = server
        .request::<CallHierarchyPrepare>(CallHierarchyPrepareParams {
            text_document_position_params: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position: symbol.anchor(),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await?
        .unwrap_or_default();

    items
        .into_iter()
        .next()
        .map(|item| (server, item))
        .ok_or_else(|| Error::NotFound(expr.to_string()))
}

async fn neighbors(
    server: &LanguageServer,
    item: &CallHierarchyItem,
    direction: Direction,
) -> Result<Vec<CallHierarchyItem>> {
    match direction {
        Direction::Outgoing => {
            let calls = server
                .request::<CallHierarchyOutgoingCalls>(CallHierarchyOutgoingCallsParams {
                    item: item.clone(),
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .await?
                .unwrap_or_default();
            Ok(calls.into_iter().map(|call| call.to).collect())
        }
        Direction::Incoming => {
            let calls = server
                .request::<CallHierarchyIncomingCalls>(CallHierarchyIncomingCallsParams {
                    item: item.clone(),
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                })
                .await?
                .unwrap_or_default();
            Ok(calls.into_iter().map(|call| call.from).collect())
        }
    }
}

async fn in_workspace(ctx: &OpContext, uri: &Url) -> bool {
    match uri_to_path(uri) {
        Ok(path) => ctx.workspaces.workspace_for(&path).await.is_ok(),
        Err(_) => false,
    }
}

async fn node_for(ctx: &OpContext, item: &CallHierarchyItem, depth: u32) -> CallNode {
    let path = uri_to_path(&item.uri).unwrap_or_default();
    CallNode {
        name: item.name.clone(),
        kind: kind_name(item.kind),
        path: ctx.display_path(&path).await,
        line: item.selection_range.start.line + 1,
        depth,
    }
}

async fn walk(
    ctx: &OpContext,
    params: &CallsParams,
    expr: &str,
    direction: Direction,
) -> Result<Vec<CallNode>> {
    let (server, root) = prepare_root(ctx, expr).await?;

    let mut nodes = vec![node_for(ctx, &root, 0).await];
    let mut visited = std::collections::HashSet::new();
    visited.insert(item_key(&root));

    let mut queue = VecDeque::new();
    queue.push_back((root, 0u32));

    while let Some((item, depth)) = queue.pop_front() {
        if depth >= params.max_depth {
            continue;
        }
        // Transient failures at one node prune that branch only.
        let related = match neighbors(&server, &item, direction).await {
            Ok(related) => related,
            Err(e) if e.is_transient() => continue,
            Err(e) => return Err(e),
        };
        for next in related {
            if !visited.insert(item_key(&next)) {
                continue;
            }
            if !params.include_non_workspace && !in_workspace(ctx, &next.uri).await {
                continue;
            }
            nodes.push(node_for(ctx, &next, depth + 1).await);
            queue.push_back((next, depth + 1));
        }
    }
    Ok(nodes)
}

async fn path_between(
    ctx: &OpContext,
    params: &CallsParams,
    from: &str,
    to: &str,
) -> Result<OpOutput> {
    let target = ctx.resolve(to).await?;
    let target_uri = crate::lsp::types::path_to_uri(&target.path)?;
    let target_pos: Position = target.anchor();

    let (server, root) = prepare_root(ctx, from).await?;

    // Parent-indexed BFS; the first hit is a shortest path and the
    // first-discovered one among equals.
    let mut items: Vec<(CallHierarchyItem, Option<usize>, u32)> = vec![(root.clone(), None, 0)];
    let mut visited = HashMap::new();
    visited.insert(item_key(&root), 0usize);

    let mut queue = VecDeque::new();
    queue.push_back(0usize);
    let mut found: Option<usize> = None;

    'search: while let Some(index) = queue.pop_front() {
        let (item, _, depth) = items[index].clone();
        if is_target(&item, &target_uri, target_pos, &target.name) {
            found = Some(index);
            break;
        }
        if depth >= params.max_depth {
            continue;
        }
        let related = match neighbors(&server, &item, Direction::Outgoing).await {
            Ok(related) => related,
            Err(e) if e.is_transient() => continue,
            Err(e) => return Err(e),
        };
        for next in related {
            let key = item_key(&next);
            if visited.contains_key(&key) {
                continue;
            }
            if !params.include_non_workspace && !in_workspace(ctx, &next.uri).await {
                continue;
            }
            let next_index = items.len();
            visited.insert(key, next_index);
            let hit = is_target(&next, &target_uri, target_pos, &target.name);
            items.push((next, Some(index), depth + 1));
            if hit {
                found = Some(next_index);
                break 'search;
            }
            queue.push_back(next_index);
        }
    }

    let Some(mut cursor) = found else {
        return Err(Error::PathNotFound {
            from: from.to_string(),
            to: to.to_string(),
            depth: params.max_depth,
        });
    };

    let mut chain = Vec::new();
    loop {
        let (item, parent, depth) = items[cursor].clone();
        chain.push(node_for(ctx, &item, depth).await);
        match parent {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    chain.reverse();
    Ok(OpOutput::CallPath { nodes: chain })
}

fn is_target(
    item: &CallHierarchyItem,
    target_uri: &Url,
    target_pos: Position,
    target_name: &str,
) -> bool {
    if item.uri != *target_uri {
        return false;
    }
    item.selection_range.start == target_pos || item.name == target_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Range, SymbolKind};

    fn item(name: &str, uri: &str, line: u32) -> CallHierarchyItem {
        let range = Range {
            start: Position { line, character: 5 },
            end: Position {
                line,
                character: 5 + name.len() as u32,
            },
        };
        CallHierarchyItem {
            name: name.to_string(),
            kind: SymbolKind::FUNCTION,
            tags: None,
            detail: None,
            uri: Url::parse(uri).unwrap(),
            range,
            selection_range: range,
            data: None,
        }
    }

    #[test]
    fn test_item_key_distinguishes_positions() {
        let a = item("f", "file:///a.go", 1);
        let b = item("f", "file:///a.go", 9);
        assert_ne!(item_key(&a), item_key(&b));
        assert_eq!(item_key(&a), item_key(&a.clone()));
    }

    #[test]
    fn test_is_target_matches_position_or_name() {
        let target = item("ValidateEmail", "file:///a.go", 10);
        let uri = Url::parse("file:///a.go").unwrap();
        assert!(is_target(
            &target,
            &uri,
            Position {
                line: 10,
                character: 5
            },
            "ValidateEmail"
        ));
        // Same file, other position, matching name still counts.
        let shifted = item("ValidateEmail", "file:///a.go", 20);
        assert!(is_target(
            &shifted,
            &uri,
            Position {
                line: 10,
                character: 5
            },
            "ValidateEmail"
        ));
        // Different file never matches.
        let elsewhere = item("ValidateEmail", "file:///b.go", 10);
        assert!(!is_target(
            &elsewhere,
            &uri,
            Position {
                line: 10,
                character: 5
            },
            "ValidateEmail"
        ));
    }

    #[test]
    fn test_default_depth() {
        let params: CallsParams = serde_json::from_str(r#"{"from": "main"}"#).unwrap();
        assert_eq!(params.max_depth, 3);
        assert!(!params.include_non_workspace);
    }
}
