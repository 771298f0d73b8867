//! Mutating operations: `rename`, `mv`, `format`, `organize-imports`,
//! `replace-function`.
//!
//! All server-driven edits funnel through one atomic applier: new file
//! contents are staged in memory first, originals are backed up, and a
//! failure while writing rolls every written file back. Either all files
//! in the response list change or none do.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lsp_types::request::{CodeActionRequest, Formatting, Rename, WillRenameFiles};
use lsp_types::{
    CodeActionContext, CodeActionKind, CodeActionOrCommand, CodeActionParams,
    DocumentChangeOperation, DocumentChanges, DocumentFormattingParams, FileRename,
    FormattingOptions, PartialResultParams, Position, Range, RenameFilesParams, RenameParams,
    SymbolKind, TextDocumentIdentifier, TextDocumentPositionParams, TextEdit,
    WorkDoneProgressParams, WorkspaceEdit,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hover::first_signature_line;
use crate::lsp::types::{path_to_uri, position_to_byte_offset, uri_to_path};
use crate::ops::{OpContext, OpOutput};
use crate::workspace::Feature;

/// Parameters for `rename`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameOpParams {
    /// Symbol expression.
    pub symbol: String,
    /// Replacement name.
    pub new_name: String,
}

/// Parameters for `mv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MvParams {
    /// Current path.
    pub old: PathBuf,
    /// Destination path.
    pub new: PathBuf,
}

/// Parameters for `format` and `organize-imports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOpParams {
    /// Target file.
    pub path: PathBuf,
}

/// Parameters for `replace-function`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceFunctionParams {
    /// Symbol expression; must resolve to a callable.
    pub symbol: String,
    /// Replacement body, including the signature line.
    pub body: String,
    /// Verify the signature is unchanged, rolling back otherwise.
    #[serde(default)]
    pub check_signature: bool,
}

/// Applies text edits to one document, last edit first so earlier
/// offsets stay valid. Pure, so the atomicity tests can drive it
/// directly.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Result<String> {
    let mut spans: Vec<(usize, usize, &str)> = Vec::with_capacity(edits.len());
    for edit in edits {
        let start = position_to_byte_offset(text, edit.range.start)
            .ok_or_else(|| Error::Protocol(format!("edit start out of range: {:?}", edit.range)))?;
        let end = position_to_byte_offset(text, edit.range.end)
            .ok_or_else(|| Error::Protocol(format!("edit end out of range: {:?}", edit.range)))?;
        if end < start {
            return Err(Error::Protocol(format!("inverted edit range: {:?}", edit.range)));
        }
        spans.push((start, end, edit.new_text.as_str()));
    }
    spans.sort_by_key(|(start, end, _)| (*start, *end));

    // Overlapping edits are a server bug the applier refuses to guess at.
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(Error::Protocol("overlapping text edits".to_string()));
        }
    }

    let mut result = text.to_string();
    for (start, end, new_text) in spans.into_iter().rev() {
        result.replace_range(start..end, new_text);
    }
    Ok(result)
}

/// Collapses a `WorkspaceEdit` into per-file edit lists. Resource
/// operations (create/rename/delete) are not applied here; `mv` performs
/// its own disk rename.
fn edits_by_file(edit: WorkspaceEdit) -> Result<HashMap<PathBuf, Vec<TextEdit>>> {
    let mut by_file: HashMap<PathBuf, Vec<TextEdit>> = HashMap::new();

    if let Some(changes) = edit.changes {
        for (uri, edits) in changes {
            by_file.entry(uri_to_path(&uri)?).or_default().extend(edits);
        }
    }

    match edit.document_changes {
        Some(DocumentChanges::Edits(doc_edits)) => {
            for doc_edit in doc_edits {
                let path = uri_to_path(&doc_edit.text_document.uri)?;
                let entry = by_file.entry(path).or_default();
                for one in doc_edit.edits {
                    match one {
                        lsp_types::OneOf::Left(edit) => entry.push(edit),
                        lsp_types::OneOf::Right(annotated) => entry.push(annotated.text_edit),
                    }
                }
            }
        }
        Some(DocumentChanges::Operations(operations)) => {
            for operation in operations {
                match operation {
                    DocumentChangeOperation::Edit(doc_edit) => {
                        let path = uri_to_path(&doc_edit.text_document.uri)?;
                        let entry = by_file.entry(path).or_default();
                        for one in doc_edit.edits {
                            match one {
                                lsp_types::OneOf::Left(edit) => entry.push(edit),
                                lsp_types::OneOf::Right(annotated) => {
                                    entry.push(annotated.text_edit)
                                }
                            }
                        }
                    }
                    DocumentChangeOperation::Op(_) => {
                        // File create/rename/delete: handled by the caller.
                    }
                }
            }
        }
        None => {}
    }

    Ok(by_file)
}

/// Applies a `WorkspaceEdit` atomically and returns the touched paths.
pub fn apply_workspace_edit(edit: WorkspaceEdit) -> Result<Vec<PathBuf>> {
    let by_file = edits_by_file(edit)?;

    // Stage everything before writing anything.
    let mut staged: Vec<(PathBuf, String, String)> = Vec::new();
    for (path, edits) in by_file {
        if edits.is_empty() {
            continue;
        }
        let original = std::fs::read_to_string(&path)?;
        let updated = apply_text_edits(&original, &edits)?;
        staged.push((path, original, updated));
    }
    staged.sort_by(|a, b| a.0.cmp(&b.0));

    let mut written: Vec<(PathBuf, String)> = Vec::new();
    for (path, original, updated) in &staged {
        if let Err(e) = std::fs::write(path, updated) {
            // Roll back everything already written.
            for (done, backup) in &written {
                let _ = std::fs::write(done, backup);
            }
            return Err(e.into());
        }
        written.push((path.clone(), original.clone()));
    }

    Ok(staged.into_iter().map(|(path, _, _)| path).collect())
}

async fn display_paths(ctx: &OpContext, paths: Vec<PathBuf>) -> Vec<String> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        out.push(ctx.display_path(&path).await);
    }
    out
}

/// Runs `rename`.
pub async fn rename(ctx: &OpContext, params: RenameOpParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::Rename).await?;
    let (uri, _) = server.sync_document(&symbol.path).await?;

    let edit = server
        .request::<Rename>(RenameParams {
            text_document_position: TextDocumentPositionParams {
                text_document: TextDocumentIdentifier { uri },
                position: symbol.anchor(),
            },
            new_name: params.new_name.clone(),
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await?
        .ok_or_else(|| Error::NotFound(format!("rename of '{}'", params.symbol)))?;

    let touched = apply_workspace_edit(edit)?;
    // The servers' view of every touched file is now stale; re-sync on
    // next use happens automatically via content hashes, but close open
    // documents so nothing caches the old text.
    for path in &touched {
        let _ = server.close_document(path).await;
    }

    Ok(OpOutput::EditedFiles {
        action: "renamed".to_string(),
        files: display_paths(ctx, touched).await,
    })
}

/// Runs `mv`: ask the server to rewrite importers, then move the file.
pub async fn mv(ctx: &OpContext, params: MvParams) -> Result<OpOutput> {
    if !params.old.exists() {
        return Err(Error::Usage(format!(
            "no such file: {}",
            params.old.display()
        )));
    }
    if params.new.exists() {
        return Err(Error::Usage(format!(
            "destination exists: {}",
            params.new.display()
        )));
    }

    let (_, server) = ctx.workspaces.server_for_file(&params.old).await?;
    let old_uri = path_to_uri(&params.old)?;
    // The destination does not exist yet, so build its URI from the
    // parent directory.
    let new_abs = if params.new.is_absolute() {
        params.new.clone()
    } else {
        std::env::current_dir()?.join(&params.new)
    };
    let new_uri = lsp_types::Url::from_file_path(&new_abs)
        .map_err(|()| Error::Usage(format!("bad destination: {}", params.new.display())))?;

    let mut touched = Vec::new();
    if server.require(Feature::WillRenameFiles).await.is_ok() {
        server.sync_document(&params.old).await?;
        let edit = server
            .request::<WillRenameFiles>(RenameFilesParams {
                files: vec![FileRename {
                    old_uri: old_uri.to_string(),
                    new_uri: new_uri.to_string(),
                }],
            })
            .await?;
        if let Some(edit) = edit {
            touched = apply_workspace_edit(edit)?;
        }
    }
    // Capability miss still renames the file; the response just lists
    // zero rewritten importers.

    let _ = server.close_document(&params.old).await;
    std::fs::rename(&params.old, &new_abs)?;

    let mut files = vec![ctx.display_path(&new_abs).await];
    for path in touched {
        if path != params.old {
            files.push(ctx.display_path(&path).await);
        }
    }
    files.sort();
    files.dedup();

    Ok(OpOutput::EditedFiles {
        action: "moved".to_string(),
        files,
    })
}

/// Runs `format`.
pub async fn format(ctx: &OpContext, params: FileOpParams) -> Result<OpOutput> {
    let (_, server) = ctx.workspaces.server_for_file(&params.path).await?;
    server.require(Feature::Formatting).await?;
    let (uri, _) = server.sync_document(&params.path).await?;

    let edits = server
        .request::<Formatting>(DocumentFormattingParams {
            text_document: TextDocumentIdentifier { uri },
            options: FormattingOptions {
                tab_size: ctx.config.formatting.tab_size,
                insert_spaces: ctx.config.formatting.insert_spaces,
                properties: HashMap::new(),
                trim_trailing_whitespace: None,
                insert_final_newline: None,
                trim_final_newlines: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await?
        .unwrap_or_default();

    let files = if edits.is_empty() {
        Vec::new()
    } else {
        let original = std::fs::read_to_string(&params.path)?;
        let updated = apply_text_edits(&original, &edits)?;
        std::fs::write(&params.path, updated)?;
        let _ = server.close_document(&params.path).await;
        vec![ctx.display_path(&params.path).await]
    };

    Ok(OpOutput::EditedFiles {
        action: "formatted".to_string(),
        files,
    })
}

/// Runs `organize-imports` through the source.organizeImports code
/// action.
pub async fn organize_imports(ctx: &OpContext, params: FileOpParams) -> Result<OpOutput> {
    let (_, server) = ctx.workspaces.server_for_file(&params.path).await?;
    server.require(Feature::CodeAction).await?;
    let (uri, _) = server.sync_document(&params.path).await?;

    let text = std::fs::read_to_string(&params.path)?;
    let end_line = text.lines().count() as u32;

    let actions = server
        .request::<CodeActionRequest>(CodeActionParams {
            text_document: TextDocumentIdentifier { uri },
            range: Range {
                start: Position {
                    line: 0,
                    character: 0,
                },
                end: Position {
                    line: end_line,
                    character: 0,
                },
            },
            context: CodeActionContext {
                diagnostics: Vec::new(),
                only: Some(vec![CodeActionKind::SOURCE_ORGANIZE_IMPORTS]),
                trigger_kind: None,
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await?
        .unwrap_or_default();

    let edit = actions.into_iter().find_map(|action| match action {
        CodeActionOrCommand::CodeAction(action) => action.edit,
        CodeActionOrCommand::Command(_) => None,
    });

    let files = match edit {
        Some(edit) => {
            let touched = apply_workspace_edit(edit)?;
            for path in &touched {
                let _ = server.close_document(path).await;
            }
            display_paths(ctx, touched).await
        }
        None => Vec::new(),
    };

    Ok(OpOutput::EditedFiles {
        action: "organized imports".to_string(),
        files,
    })
}

const CALLABLE_KINDS: &[SymbolKind] = &[
    SymbolKind::FUNCTION,
    SymbolKind::METHOD,
    SymbolKind::CONSTRUCTOR,
];

/// Runs `replace-function`.
///
/// The body from the start of the symbol's enclosing range to its end is
/// replaced wholesale. With `check_signature`, hover signatures before
/// and after must agree (modulo whitespace) or the file is restored from
/// backup.
pub async fn replace_function(
    ctx: &OpContext,
    params: ReplaceFunctionParams,
) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    if !CALLABLE_KINDS.contains(&symbol.kind) {
        return Err(Error::Usage(format!(
            "'{}' is a {}, not a function",
            params.symbol,
            crate::lsp::types::symbol_kind_name(symbol.kind)
        )));
    }

    let original_signature = if params.check_signature {
        ctx.hover_text(&symbol.path, symbol.anchor())
            .await?
            .map(|text| first_signature_line(&text))
    } else {
        None
    };

    // Snapshot, then rewrite the enclosing range in place.
    let backup = std::fs::read_to_string(&symbol.path)?;
    let start = position_to_byte_offset(&backup, symbol.range.start)
        .ok_or_else(|| Error::Protocol("symbol range out of file".to_string()))?;
    let end = position_to_byte_offset(&backup, symbol.range.end)
        .ok_or_else(|| Error::Protocol("symbol range out of file".to_string()))?;

    let mut updated = backup.clone();
    updated.replace_range(start..end, &params.body);
    std::fs::write(&symbol.path, &updated)?;

    let commit = verify_replacement(ctx, &symbol, original_signature.as_deref()).await;
    match commit {
        Ok(()) => Ok(OpOutput::Replaced {
            lines: params.body.lines().count(),
        }),
        Err(e) => {
            // Any failure after the write restores the snapshot.
            std::fs::write(&symbol.path, &backup)?;
            if let Ok((_, server)) = ctx.workspaces.server_for_file(&symbol.path).await {
                let _ = server.sync_document(&symbol.path).await;
            }
            Err(e)
        }
    }
}

async fn verify_replacement(
    ctx: &OpContext,
    symbol: &crate::index::resolver::ResolvedSymbol,
    original_signature: Option<&str>,
) -> Result<()> {
    // Push the new content at the server regardless, so later operations
    // see the edit.
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.sync_document(&symbol.path).await?;

    let Some(expected) = original_signature else {
        return Ok(());
    };

    let after = ctx
        .hover_text(&symbol.path, symbol.anchor())
        .await?
        .map(|text| first_signature_line(&text))
        .unwrap_or_default();

    if normalize_signature(expected) == normalize_signature(&after) {
        Ok(())
    } else {
        Err(Error::SignatureChanged {
            expected: expected.to_string(),
            actual: after,
        })
    }
}

fn normalize_signature(signature: &str) -> String {
    signature.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextEdit {
        TextEdit {
            range: Range {
                start: Position {
                    line: start.0,
                    character: start.1,
                },
                end: Position {
                    line: end.0,
                    character: end.1,
                },
            },
            new_text: text.to_string(),
        }
    }

    #[test]
    fn test_apply_single_edit() {
        let text = "let x = 1;\nlet y = 2;\n";
        let updated = apply_text_edits(text, &[edit((0, 4), (0, 5), "renamed")]).unwrap();
        assert_eq!(updated, "let renamed = 1;\nlet y = 2;\n");
    }

    #[test]
    fn test_apply_multiple_edits_preserves_offsets() {
        let text = "aaa bbb aaa\n";
        let edits = vec![edit((0, 0), (0, 3), "zz"), edit((0, 8), (0, 11), "zz")];
        assert_eq!(apply_text_edits(text, &edits).unwrap(), "zz bbb zz\n");
    }

    #[test]
    fn test_apply_insertion() {
        let text = "fn f() {}\n";
        let updated = apply_text_edits(text, &[edit((0, 9), (0, 9), " // done")]).unwrap();
        assert_eq!(updated, "fn f() {} // done\n");
    }

    #[test]
    fn test_overlapping_edits_rejected() {
        let text = "abcdef\n";
        let edits = vec![edit((0, 0), (0, 4), "x"), edit((0, 2), (0, 6), "y")];
        let err = apply_text_edits(text, &edits).unwrap_err();
        assert_eq!(err.kind(), "ProtocolError");
    }

    #[test]
    fn test_rename_round_trip_is_noop() {
        let text = "struct EditablePerson;\nfn use_it(p: EditablePerson) {}\n";
        let forward = vec![
            edit((0, 7), (0, 21), "RenamedPerson"),
            edit((1, 13), (1, 27), "RenamedPerson"),
        ];
        let renamed = apply_text_edits(text, &forward).unwrap();
        assert!(renamed.contains("RenamedPerson"));

        let backward = vec![
            edit((0, 7), (0, 20), "EditablePerson"),
            edit((1, 13), (1, 26), "EditablePerson"),
        ];
        let restored = apply_text_edits(&renamed, &backward).unwrap();
        assert_eq!(restored, text);
    }

    #[test]
    fn test_workspace_edit_atomic_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ts");
        std::fs::write(&good, "export const a = 1;\n").unwrap();

        // Second file's edit is out of range, so staging fails before
        // anything is written.
        let bad = dir.path().join("bad.ts");
        std::fs::write(&bad, "x\n").unwrap();

        let mut changes = HashMap::new();
        changes.insert(
            lsp_types::Url::from_file_path(&good).unwrap(),
            vec![edit((0, 13), (0, 14), "b")],
        );
        changes.insert(
            lsp_types::Url::from_file_path(&bad).unwrap(),
            vec![edit((99, 0), (99, 1), "y")],
        );
        let workspace_edit = WorkspaceEdit {
            changes: Some(changes),
            document_changes: None,
            change_annotations: None,
        };

        let err = apply_workspace_edit(workspace_edit).unwrap_err();
        assert_eq!(err.kind(), "ProtocolError");
        // Neither file changed.
        assert_eq!(std::fs::read_to_string(&good).unwrap(), "export const a = 1;\n");
        assert_eq!(std::fs::read_to_string(&bad).unwrap(), "x\n");
    }

    #[test]
    fn test_workspace_edit_document_changes_variant() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "const one = 1;\n").unwrap();

        let workspace_edit = WorkspaceEdit {
            changes: None,
            document_changes: Some(DocumentChanges::Edits(vec![lsp_types::TextDocumentEdit {
                text_document: lsp_types::OptionalVersionedTextDocumentIdentifier {
                    uri: lsp_types::Url::from_file_path(&file).unwrap(),
                    version: None,
                },
                edits: vec![lsp_types::OneOf::Left(edit((0, 6), (0, 9), "uno"))],
            }])),
            change_annotations: None,
        };

        let touched = apply_workspace_edit(workspace_edit).unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "const uno = 1;\n");
    }

    #[test]
    fn test_normalize_signature_ignores_whitespace() {
        assert_eq!(
            normalize_signature("def  create_sample_user( )  ->  User"),
            normalize_signature("def create_sample_user() -> User")
        );
        assert_ne!(
            normalize_signature("def f(x: int)"),
            normalize_signature("def f(x: str)")
        );
    }
}
