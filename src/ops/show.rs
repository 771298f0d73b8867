//! `show` and `hover` — print a symbol's body or its hover card.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ops::{OpContext, OpOutput};

/// Parameters for `show`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowParams {
    /// Symbol expression.
    pub symbol: String,
    /// Extra context lines above and below the body.
    #[serde(default)]
    pub context: usize,
    /// Keep only the first N lines of the body.
    #[serde(default)]
    pub head: Option<usize>,
}

/// Parameters for `hover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoverOpParams {
    /// Symbol expression.
    pub symbol: String,
}

/// Runs `show`: the body spans from the selection-range start line to the
/// end of the symbol's enclosing range.
pub async fn show(ctx: &OpContext, params: ShowParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let text = tokio::fs::read_to_string(&symbol.path).await?;
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Ok(OpOutput::Show {
            header: format!("{}:0-0", symbol.relative_path.display()),
            text: String::new(),
        });
    }

    // Clamp to the file in case the server's view is ahead of the disk.
    let start = (symbol.selection_range.start.line as usize).min(lines.len() - 1);
    // A range ending at column 0 stops *before* that line.
    let range_end = symbol.range.end;
    let mut end = range_end.line as usize;
    if range_end.character == 0 && end > start {
        end -= 1;
    }
    let end = end.min(lines.len().saturating_sub(1));

    let slab_start = start.saturating_sub(params.context);
    let mut slab_end = (end + params.context).min(lines.len().saturating_sub(1));
    if let Some(head) = params.head {
        slab_end = slab_end.min(slab_start + head.saturating_sub(1));
    }

    let header = format!(
        "{}:{}-{}",
        symbol.relative_path.display(),
        slab_start + 1,
        slab_end + 1
    );
    let mut body = lines[slab_start..=slab_end].join("\n");
    body.push('\n');

    Ok(OpOutput::Show { header, text: body })
}

/// Runs `hover`.
pub async fn hover(ctx: &OpContext, params: HoverOpParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let text = ctx
        .hover_text(&symbol.path, symbol.anchor())
        .await?
        .unwrap_or_else(|| "no hover information".to_string());
    Ok(OpOutput::Hover { text })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_params_defaults() {
        let params: ShowParams = serde_json::from_str(r#"{"symbol": "main"}"#).unwrap();
        assert_eq!(params.context, 0);
        assert!(params.head.is_none());
    }
}
