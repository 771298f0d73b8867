//! `diagnostics` — one file or the whole workspace.
//!
//! Diagnostics arrive as `publishDiagnostics` pushes, not responses, so
//! the handler subscribes to the server's notification stream, opens each
//! target file (which triggers analysis), collects the push for that URI
//! within a short window, and closes the file again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lsp_types::{DiagnosticSeverity, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lsp::ServerNotification;
use crate::lsp::types::utf16_col_to_byte;
use crate::ops::{DiagnosticItem, OpContext, OpOutput};

/// How long to wait for a server to push diagnostics for one file.
const PUBLISH_WINDOW: Duration = Duration::from_secs(3);

/// Parameters for `diagnostics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsParams {
    /// Restrict to one file; whole workspace when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Severity floor: error, warning, information, hint.
    #[serde(default)]
    pub severity: Option<String>,
}

fn severity_rank(severity: DiagnosticSeverity) -> u8 {
    match severity {
        DiagnosticSeverity::ERROR => 1,
        DiagnosticSeverity::WARNING => 2,
        DiagnosticSeverity::INFORMATION => 3,
        _ => 4,
    }
}

fn severity_name(severity: DiagnosticSeverity) -> &'static str {
    match severity {
        DiagnosticSeverity::ERROR => "error",
        DiagnosticSeverity::WARNING => "warning",
        DiagnosticSeverity::INFORMATION => "information",
        _ => "hint",
    }
}

fn parse_floor(name: &str) -> Result<u8> {
    match name.to_ascii_lowercase().as_str() {
        "error" => Ok(1),
        "warning" => Ok(2),
        "information" | "info" => Ok(3),
        "hint" => Ok(4),
        other => Err(Error::Usage(format!("unknown severity '{other}'"))),
    }
}

/// Runs `diagnostics`.
pub async fn diagnostics(ctx: &OpContext, params: DiagnosticsParams) -> Result<OpOutput> {
    let floor = match &params.severity {
        Some(name) => parse_floor(name)?,
        None => 4,
    };

    let mut items = Vec::new();
    let mut warnings = Vec::new();

    let files: Vec<PathBuf> = match &params.path {
        Some(path) => vec![path.clone()],
        None => {
            let mut files = Vec::new();
            for workspace in ctx.workspaces.all().await {
                for path in crate::index::enumerate_source_files_blocking(
                    &workspace.root,
                    &ctx.config.workspaces.exclude,
                )
                .await?
                {
                    if ctx.workspaces.registry().detect_language(&path).is_some() {
                        files.push(path);
                    }
                }
            }
            files
        }
    };

    for path in files {
        match collect_for_file(ctx, &path).await {
            Ok(diagnostics) => {
                for diagnostic in diagnostics {
                    let severity = diagnostic
                        .severity
                        .unwrap_or(DiagnosticSeverity::INFORMATION);
                    if severity_rank(severity) > floor {
                        continue;
                    }
                    items.push(to_item(ctx, &path, severity, diagnostic).await);
                }
            }
            Err(e) if e.is_transient() => {
                warnings.push(format!("{}: {e}", path.display()));
            }
            Err(Error::NotFound(_)) if params.path.is_none() => {
                // No server for this file during a workspace sweep.
            }
            Err(e) => return Err(e),
        }
    }

    items.sort_by(|a, b| (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column)));
    Ok(OpOutput::Diagnostics { items, warnings })
}

/// Opens one file and waits for its `publishDiagnostics` push.
async fn collect_for_file(
    ctx: &OpContext,
    path: &Path,
) -> Result<Vec<lsp_types::Diagnostic>> {
    let (_, server) = ctx.workspaces.server_for_file(path).await?;

    // Subscribe before opening so the push cannot slip past us.
    let mut notifications = server.notifications().await;
    let (uri, _) = server.sync_document(path).await?;

    let result = wait_for_publish(&mut notifications, &uri).await;
    server.close_document(path).await?;
    Ok(result)
}

async fn wait_for_publish(
    notifications: &mut tokio::sync::broadcast::Receiver<ServerNotification>,
    uri: &Url,
) -> Vec<lsp_types::Diagnostic> {
    let deadline = tokio::time::Instant::now() + PUBLISH_WINDOW;
    loop {
        let message = tokio::time::timeout_at(deadline, notifications.recv()).await;
        match message {
            Ok(Ok(ServerNotification::Diagnostics(params))) if params.uri == *uri => {
                return params.diagnostics;
            }
            // Other notifications: keep waiting.
            Ok(Ok(_)) => continue,
            // Lagged behind the broadcast buffer: keep waiting.
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
            // Channel closed or window elapsed: nothing pushed.
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) | Err(_) => {
                return Vec::new();
            }
        }
    }
}

async fn to_item(
    ctx: &OpContext,
    path: &Path,
    severity: DiagnosticSeverity,
    diagnostic: lsp_types::Diagnostic,
) -> DiagnosticItem {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    let line_text = text
        .lines()
        .nth(diagnostic.range.start.line as usize)
        .unwrap_or("");
    let column = utf16_col_to_byte(line_text, diagnostic.range.start.character) as u32 + 1;

    DiagnosticItem {
        path: ctx.display_path(path).await,
        line: diagnostic.range.start.line + 1,
        column,
        severity: severity_name(severity).to_string(),
        source: diagnostic.source.unwrap_or_default(),
        message: diagnostic.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_floor_parse() {
        assert_eq!(parse_floor("error").unwrap(), 1);
        assert_eq!(parse_floor("WARNING").unwrap(), 2);
        assert_eq!(parse_floor("info").unwrap(), 3);
        assert!(parse_floor("fatal").is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(severity_rank(DiagnosticSeverity::ERROR) < severity_rank(DiagnosticSeverity::HINT));
        assert_eq!(severity_name(DiagnosticSeverity::WARNING), "warning");
    }

    #[test]
    fn test_params_default_to_workspace_sweep() {
        let params: DiagnosticsParams = serde_json::from_str("{}").unwrap();
        assert!(params.path.is_none());
        assert!(params.severity.is_none());
    }
}
