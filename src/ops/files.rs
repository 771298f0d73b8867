//! `files` — enumerate workspace files with the same ignore rules the
//! index uses.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{build_globset, enumerate_source_files_blocking};
use crate::ops::{OpContext, OpOutput};

/// Parameters for `files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesParams {
    /// Substring filter on the relative path.
    #[serde(default)]
    pub path: Option<String>,
    /// Exclude globs.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Include globs; when present a file must match one.
    #[serde(default)]
    pub include: Vec<String>,
    /// File-name globs matched against the final component.
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

/// Runs `files`.
pub async fn files(ctx: &OpContext, params: FilesParams) -> Result<OpOutput> {
    let mut excludes = ctx.config.workspaces.exclude.clone();
    excludes.extend(params.exclude.iter().cloned());

    let includes = if params.include.is_empty() {
        None
    } else {
        Some(build_globset(&params.include)?)
    };
    let name_patterns = if params.file_patterns.is_empty() {
        None
    } else {
        Some(build_globset(&params.file_patterns)?)
    };

    let mut out: Vec<String> = Vec::new();
    for workspace in ctx.workspaces.all().await {
        for path in enumerate_source_files_blocking(&workspace.root, &excludes).await? {
            let relative: PathBuf = workspace.relative(&path);
            let relative_str = relative.to_string_lossy();

            if let Some(filter) = &params.path
                && !relative_str.contains(filter.as_str())
            {
                continue;
            }
            if let Some(includes) = &includes
                && !includes.is_match(&relative)
            {
                continue;
            }
            if let Some(name_patterns) = &name_patterns {
                let name = relative.file_name().map(PathBuf::from).unwrap_or_default();
                if !name_patterns.is_match(&name) {
                    continue;
                }
            }
            out.push(relative_str.into_owned());
        }
    }
    out.sort();
    out.dedup();
    Ok(OpOutput::FileList { files: out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_all_default() {
        let params: FilesParams = serde_json::from_str("{}").unwrap();
        assert!(params.path.is_none());
        assert!(params.exclude.is_empty());
        assert!(params.include.is_empty());
        assert!(params.file_patterns.is_empty());
    }
}
