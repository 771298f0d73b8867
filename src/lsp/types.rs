//! Position, path and symbol-kind helpers shared across the crate.
//!
//! LSP positions are 0-based (line, UTF-16 code unit); users see 1-based
//! lines with byte columns. All conversion between the two views funnels
//! through here so the surrogate-pair arithmetic exists exactly once.

use std::path::{Path, PathBuf};

use lsp_types::{Position, SymbolKind, Url};

use crate::error::{Error, Result};

/// Converts a filesystem path to a `file://` URI.
///
/// Relative paths are resolved against the current directory; the result
/// is canonicalized so URIs compare equal across symlinked spellings.
pub fn path_to_uri(path: &Path) -> Result<Url> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let canonical = absolute.canonicalize().map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("cannot resolve '{}': {e}", path.display()),
        ))
    })?;
    Url::from_file_path(&canonical)
        .map_err(|()| Error::Usage(format!("not a file path: {}", canonical.display())))
}

/// Converts a `file://` URI back to a path.
pub fn uri_to_path(uri: &Url) -> Result<PathBuf> {
    uri.to_file_path()
        .map_err(|()| Error::Protocol(format!("non-file URI from server: {uri}")))
}

/// Converts a UTF-16 code-unit column to a byte offset within `line`.
///
/// Columns past the end of the line clamp to the line length, matching
/// how servers treat out-of-range positions.
pub fn utf16_col_to_byte(line: &str, utf16_col: u32) -> usize {
    let mut remaining = utf16_col as usize;
    for (byte_idx, ch) in line.char_indices() {
        if remaining == 0 {
            return byte_idx;
        }
        let units = ch.len_utf16();
        if units > remaining {
            // Position inside a surrogate pair; snap to the char start.
            return byte_idx;
        }
        remaining -= units;
    }
    line.len()
}

/// Converts a byte offset within `line` to a UTF-16 code-unit column.
pub fn byte_col_to_utf16(line: &str, byte_col: usize) -> u32 {
    let clamped = byte_col.min(line.len());
    line[..clamped]
        .chars()
        .map(|c| c.len_utf16() as u32)
        .sum()
}

/// Byte offset of the start of a wire position within full file text.
///
/// Returns `None` when the line is past the end of the document.
pub fn position_to_byte_offset(text: &str, position: Position) -> Option<usize> {
    let mut offset = 0usize;
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        if idx == position.line as usize {
            let content = line.strip_suffix('\n').unwrap_or(line);
            let content = content.strip_suffix('\r').unwrap_or(content);
            return Some(offset + utf16_col_to_byte(content, position.character));
        }
        offset += line.len();
    }
    // A position on the line just past the last newline addresses EOF.
    if position.line as usize == text.split_inclusive('\n').count() {
        Some(text.len())
    } else {
        None
    }
}

/// Human-readable name for an LSP symbol kind.
pub fn symbol_kind_name(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enum_member",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "type_parameter",
        _ => "unknown",
    }
}

/// Parses a user-supplied kind name (as accepted by `grep -k`).
///
/// `class` deliberately also matches `struct` and vice versa: collapsing
/// the distinction matches how users think across languages.
pub fn parse_symbol_kinds(name: &str) -> Result<Vec<SymbolKind>> {
    let kinds = match name.to_ascii_lowercase().as_str() {
        "file" => vec![SymbolKind::FILE],
        "module" => vec![SymbolKind::MODULE],
        "namespace" => vec![SymbolKind::NAMESPACE],
        "package" => vec![SymbolKind::PACKAGE],
        "class" | "struct" => vec![SymbolKind::CLASS, SymbolKind::STRUCT],
        "method" => vec![SymbolKind::METHOD],
        "property" => vec![SymbolKind::PROPERTY],
        "field" => vec![SymbolKind::FIELD],
        "constructor" => vec![SymbolKind::CONSTRUCTOR],
        "enum" => vec![SymbolKind::ENUM],
        "interface" | "trait" => vec![SymbolKind::INTERFACE],
        "function" => vec![SymbolKind::FUNCTION],
        "variable" => vec![SymbolKind::VARIABLE],
        "constant" => vec![SymbolKind::CONSTANT],
        "enum_member" => vec![SymbolKind::ENUM_MEMBER],
        "event" => vec![SymbolKind::EVENT],
        "operator" => vec![SymbolKind::OPERATOR],
        "type_parameter" => vec![SymbolKind::TYPE_PARAMETER],
        other => return Err(Error::Usage(format!("unknown symbol kind '{other}'"))),
    };
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_ascii_columns_are_bytes() {
        let line = "fn main() {}";
        assert_eq!(utf16_col_to_byte(line, 3), 3);
        assert_eq!(byte_col_to_utf16(line, 3), 3);
    }

    #[test]
    fn test_utf16_surrogate_pair() {
        // '𝕊' is one char, 4 bytes, 2 UTF-16 units.
        let line = "let 𝕊x = 1";
        assert_eq!(utf16_col_to_byte(line, 4), 4); // before the pair
        assert_eq!(utf16_col_to_byte(line, 6), 8); // after the pair
        assert_eq!(byte_col_to_utf16(line, 8), 6);
    }

    #[test]
    fn test_utf16_col_clamps_past_end() {
        assert_eq!(utf16_col_to_byte("ab", 99), 2);
        assert_eq!(byte_col_to_utf16("ab", 99), 2);
    }

    #[test]
    fn test_position_to_byte_offset_crlf() {
        let text = "one\r\ntwo\r\n";
        let offset = position_to_byte_offset(
            text,
            Position {
                line: 1,
                character: 1,
            },
        );
        assert_eq!(offset, Some(6));
        assert_eq!(&text[6..7], "w");
    }

    #[test]
    fn test_position_past_document_end() {
        let text = "only\n";
        assert!(
            position_to_byte_offset(
                text,
                Position {
                    line: 5,
                    character: 0
                }
            )
            .is_none()
        );
    }

    #[test]
    fn test_parse_symbol_kinds_aliases() {
        assert_eq!(
            parse_symbol_kinds("class").unwrap(),
            vec![SymbolKind::CLASS, SymbolKind::STRUCT]
        );
        assert_eq!(
            parse_symbol_kinds("trait").unwrap(),
            vec![SymbolKind::INTERFACE]
        );
        assert!(parse_symbol_kinds("gadget").is_err());
    }

    #[test]
    fn test_symbol_kind_name() {
        assert_eq!(symbol_kind_name(SymbolKind::FUNCTION), "function");
        assert_eq!(symbol_kind_name(SymbolKind::STRUCT), "struct");
    }
}
