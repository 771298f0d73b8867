//! Location-list operations: `refs`, `implementations`, `declaration`,
//! `subtypes`, `supertypes`.
//!
//! Each resolves the symbol expression, gates on the server capability,
//! issues exactly one LSP request, and renders the locations. Nothing is
//! recursive here; transitive closures are the server's business.

use lsp_types::request::{
    GotoDeclaration, GotoImplementation, References, TypeHierarchyPrepare, TypeHierarchySubtypes,
    TypeHierarchySupertypes,
};
use lsp_types::{
    PartialResultParams, ReferenceContext, ReferenceParams, TextDocumentIdentifier,
    TextDocumentPositionParams, TypeHierarchyItem, TypeHierarchyPrepareParams,
    TypeHierarchySubtypesParams, TypeHierarchySupertypesParams, WorkDoneProgressParams,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::resolver::ResolvedSymbol;
use crate::ops::{LocationItem, OpContext, OpOutput, goto_response_locations};
use crate::workspace::Feature;

/// Parameters shared by the location-list operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateParams {
    /// Symbol expression.
    pub symbol: String,
    /// Context lines per location.
    #[serde(default)]
    pub context: usize,
}

async fn position_params(
    ctx: &OpContext,
    symbol: &ResolvedSymbol,
) -> Result<TextDocumentPositionParams> {
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    let (uri, _) = server.sync_document(&symbol.path).await?;
    Ok(TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri },
        position: symbol.anchor(),
    })
}

async fn locations_output(
    ctx: &OpContext,
    locations: Vec<lsp_types::Location>,
    context: usize,
) -> Result<OpOutput> {
    let mut items = Vec::with_capacity(locations.len());
    for location in locations {
        items.push(
            LocationItem::from_wire(ctx, &location.uri, location.range.start, context).await?,
        );
    }
    items.sort_by(|a, b| (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column)));
    Ok(OpOutput::Locations {
        items,
        warnings: Vec::new(),
    })
}

/// `refs` — strictly the server's `textDocument/references` response.
pub async fn refs(ctx: &OpContext, params: NavigateParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::References).await?;

    let text_document_position = position_params(ctx, &symbol).await?;
    let locations = server
        .request::<References>(ReferenceParams {
            text_document_position,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration: true,
            },
        })
        .await?
        .unwrap_or_default();
    let _ = server.close_document(&symbol.path).await;

    locations_output(ctx, locations, params.context).await
}

/// `implementations` — single level, no transitive closure.
pub async fn implementations(ctx: &OpContext, params: NavigateParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::Implementation).await?;

    let text_document_position_params = position_params(ctx, &symbol).await?;
    let response = server
        .request::<GotoImplementation>(lsp_types::request::GotoImplementationParams {
            text_document_position_params,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await?;
    let _ = server.close_document(&symbol.path).await;

    locations_output(ctx, goto_response_locations(response), params.context).await
}

/// `declaration`.
pub async fn declaration(ctx: &OpContext, params: NavigateParams) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::Declaration).await?;

    let text_document_position_params = position_params(ctx, &symbol).await?;
    let response = server
        .request::<GotoDeclaration>(lsp_types::request::GotoDeclarationParams {
            text_document_position_params,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await?;
    let _ = server.close_document(&symbol.path).await;

    locations_output(ctx, goto_response_locations(response), params.context).await
}

/// Direction for the type-hierarchy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyDirection {
    /// `subtypes`.
    Sub,
    /// `supertypes`.
    Super,
}

/// `subtypes` / `supertypes` via `textDocument/prepareTypeHierarchy`.
pub async fn type_hierarchy(
    ctx: &OpContext,
    params: NavigateParams,
    direction: HierarchyDirection,
) -> Result<OpOutput> {
    let symbol = ctx.resolve(&params.symbol).await?;
    let (_, server) = ctx.workspaces.server_for_file(&symbol.path).await?;
    server.require(Feature::TypeHierarchy).await?;

    let text_document_position_params = position_params(ctx, &symbol).await?;
    let items: Vec<TypeHierarchyItem> = server
        .request::<TypeHierarchyPrepare>(TypeHierarchyPrepareParams {
            text_document_position_params,
            work_done_progress_params: WorkDoneProgressParams::default(),
        })
        .await?
        .unwrap_or_default();

    let Some(item) = items.into_iter().next() else {
        return Err(Error::NotFound(params.symbol));
    };

    let related = match direction {
        HierarchyDirection::Sub => server
            .request::<TypeHierarchySubtypes>(TypeHierarchySubtypesParams {
                item,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            })
            .await?
            .unwrap_or_default(),
        HierarchyDirection::Super => server
            .request::<TypeHierarchySupertypes>(TypeHierarchySupertypesParams {
                item,
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            })
            .await?
            .unwrap_or_default(),
    };

    let _ = server.close_document(&symbol.path).await;
    let locations = related
        .into_iter()
        .map(|item| lsp_types::Location {
            uri: item.uri,
            range: item.selection_range,
        })
        .collect();
    locations_output(ctx, locations, params.context).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_params_defaults() {
        let params: NavigateParams = serde_json::from_str(r#"{"symbol": "Writer"}"#).unwrap();
        assert_eq!(params.context, 0);
    }

    #[test]
    fn test_direction_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&HierarchyDirection::Sub).unwrap(),
            "\"sub\""
        );
    }
}
