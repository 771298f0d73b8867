//! Flattened document-symbol trees.
//!
//! Servers return symbols either as a nested `DocumentSymbol` tree or as
//! flat `SymbolInformation` records. Both are normalized into one arena:
//! nodes in a `Vec`, parentage as an index into the same `Vec`. No
//! back-pointers, no cycles; container paths are recovered by walking the
//! parent array.

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Range, SymbolKind, Url};

/// One symbol in a file.
#[derive(Debug, Clone)]
pub struct SymbolNode {
    /// Symbol name as reported by the server.
    pub name: String,
    /// LSP symbol kind.
    pub kind: SymbolKind,
    /// Full extent of the symbol (body included).
    pub range: Range,
    /// The name token only.
    pub selection_range: Range,
    /// Index of the enclosing symbol in the same tree.
    pub parent: Option<usize>,
    /// Container name for flat responses that carry no tree structure.
    pub container: Option<String>,
}

/// All symbols of one file at one content hash.
#[derive(Debug, Clone)]
pub struct SymbolTree {
    /// Document URI.
    pub uri: Url,
    /// Content hash of the text these symbols were computed from.
    pub hash: String,
    nodes: Vec<SymbolNode>,
}

impl SymbolTree {
    /// Normalizes a server response into an arena.
    pub fn from_response(uri: Url, hash: String, response: DocumentSymbolResponse) -> Self {
        let mut tree = Self {
            uri,
            hash,
            nodes: Vec::new(),
        };
        match response {
            DocumentSymbolResponse::Nested(symbols) => {
                for symbol in symbols {
                    tree.push_nested(symbol, None);
                }
            }
            DocumentSymbolResponse::Flat(symbols) => {
                for info in symbols {
                    #[allow(deprecated)]
                    tree.nodes.push(SymbolNode {
                        name: info.name,
                        kind: info.kind,
                        range: info.location.range,
                        selection_range: info.location.range,
                        parent: None,
                        container: info.container_name,
                    });
                }
            }
        }
        tree
    }

    fn push_nested(&mut self, symbol: DocumentSymbol, parent: Option<usize>) {
        let index = self.nodes.len();
        let children = symbol.children;
        self.nodes.push(SymbolNode {
            name: symbol.name,
            kind: symbol.kind,
            range: symbol.range,
            selection_range: symbol.selection_range,
            parent,
            container: None,
        });
        for child in children.into_iter().flatten() {
            self.push_nested(child, Some(index));
        }
    }

    /// All nodes, in document order (parents before children).
    pub fn nodes(&self) -> &[SymbolNode] {
        &self.nodes
    }

    /// Container names from outermost to innermost for a node.
    pub fn container_path(&self, index: usize) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = self.nodes[index].parent;
        while let Some(idx) = current {
            path.push(self.nodes[idx].name.clone());
            current = self.nodes[idx].parent;
        }
        path.reverse();
        if path.is_empty()
            && let Some(container) = &self.nodes[index].container
            && !container.is_empty()
        {
            path.push(container.clone());
        }
        path
    }

    /// Dot-joined container path plus the node's own name.
    pub fn qualified_name(&self, index: usize) -> String {
        let mut parts = self.container_path(index);
        parts.push(self.nodes[index].name.clone());
        parts.join(".")
    }

    /// Rough heap footprint, used for the index byte budget.
    pub fn approx_bytes(&self) -> usize {
        let fixed = std::mem::size_of::<SymbolNode>() * self.nodes.len();
        let strings: usize = self
            .nodes
            .iter()
            .map(|n| n.name.len() + n.container.as_ref().map_or(0, String::len))
            .sum();
        fixed + strings + self.uri.as_str().len() + self.hash.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Position;

    fn range(line: u32) -> Range {
        Range {
            start: Position { line, character: 0 },
            end: Position {
                line: line + 1,
                character: 0,
            },
        }
    }

    #[allow(deprecated)]
    fn nested(name: &str, kind: SymbolKind, line: u32, children: Vec<DocumentSymbol>) -> DocumentSymbol {
        DocumentSymbol {
            name: name.to_string(),
            detail: None,
            kind,
            tags: None,
            deprecated: None,
            range: range(line),
            selection_range: range(line),
            children: if children.is_empty() {
                None
            } else {
                Some(children)
            },
        }
    }

    fn sample_uri() -> Url {
        Url::parse("file:///tmp/sample.ts").unwrap()
    }

    #[test]
    fn test_nested_flattening_preserves_parentage() {
        let response = DocumentSymbolResponse::Nested(vec![nested(
            "UserStore",
            SymbolKind::CLASS,
            0,
            vec![
                nested("save", SymbolKind::METHOD, 1, vec![]),
                nested("load", SymbolKind::METHOD, 3, vec![]),
            ],
        )]);
        let tree = SymbolTree::from_response(sample_uri(), "h".into(), response);

        assert_eq!(tree.nodes().len(), 3);
        assert_eq!(tree.nodes()[0].parent, None);
        assert_eq!(tree.nodes()[1].parent, Some(0));
        assert_eq!(tree.qualified_name(1), "UserStore.save");
        assert_eq!(tree.container_path(2), vec!["UserStore".to_string()]);
    }

    #[test]
    fn test_deep_nesting_walks_whole_chain() {
        let response = DocumentSymbolResponse::Nested(vec![nested(
            "outer",
            SymbolKind::MODULE,
            0,
            vec![nested(
                "Middle",
                SymbolKind::CLASS,
                1,
                vec![nested("leaf", SymbolKind::METHOD, 2, vec![])],
            )],
        )]);
        let tree = SymbolTree::from_response(sample_uri(), "h".into(), response);
        assert_eq!(tree.qualified_name(2), "outer.Middle.leaf");
    }

    #[test]
    fn test_flat_response_uses_container_name() {
        #[allow(deprecated)]
        let response = DocumentSymbolResponse::Flat(vec![lsp_types::SymbolInformation {
            name: "save".to_string(),
            kind: SymbolKind::METHOD,
            tags: None,
            deprecated: None,
            location: lsp_types::Location {
                uri: sample_uri(),
                range: range(4),
            },
            container_name: Some("UserStore".to_string()),
        }]);
        let tree = SymbolTree::from_response(sample_uri(), "h".into(), response);
        assert_eq!(tree.qualified_name(0), "UserStore.save");
    }

    #[test]
    fn test_empty_file_yields_empty_tree() {
        let tree = SymbolTree::from_response(
            sample_uri(),
            "h".into(),
            DocumentSymbolResponse::Nested(vec![]),
        );
        assert!(tree.nodes().is_empty());
        assert!(tree.approx_bytes() > 0);
    }
}
