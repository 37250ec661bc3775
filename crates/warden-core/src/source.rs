//! Source location tracking, threaded from the lexer through compilation.

use serde::{Deserialize, Serialize};

/// A location in a policy source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub document_name: String,
    pub line: u32,
    pub start_char: u32,
    pub end_char: u32,
}

impl SourceLocation {
    pub fn new(document_name: impl Into<String>, line: u32, start_char: u32, end_char: u32) -> Self {
        SourceLocation {
            document_name: document_name.into(),
            line,
            start_char,
            end_char,
        }
    }
}

/// A token (or AST node) tagged with the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub line: u32,
}

impl<T> Spanned<T> {
    pub fn new(node: T, line: u32) -> Self {
        Spanned { node, line }
    }
}
