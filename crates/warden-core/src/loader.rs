//! One-shot loader for a directory of `.warden` source files into a `PdpConfig`-shaped
//! bundle (SPEC_FULL.md §4.11). One document per file, the same convention `tenor-cli`
//! uses for its `.tenor` construct files. No filesystem watching: a caller that wants
//! live reload calls `load_dir` again.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::ast::Document;
use crate::error::ElabError;

#[derive(Debug)]
pub enum LoadError {
    Io { path: String, source: std::io::Error },
    Parse(ElabError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io { path, source } => write!(f, "reading '{}': {}", path, source),
            LoadError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Parse(e) => Some(e),
        }
    }
}

impl From<ElabError> for LoadError {
    fn from(e: ElabError) -> Self {
        LoadError::Parse(e)
    }
}

/// Load every `*.warden` file directly under `dir`, in sorted filename order (so
/// source-list order -- which the combining engine's tie-breaker depends on, §4.7 --
/// is stable across runs).
pub fn load_dir(dir: &Path) -> Result<Vec<Document>, LoadError> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(|e| LoadError::Io { path: dir.display().to_string(), source: e })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("warden"))
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let src = fs::read_to_string(&path)
            .map_err(|e| LoadError::Io { path: path.display().to_string(), source: e })?;
        let document_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<unknown>")
            .to_string();
        docs.push(crate::parser::parse_document(&src, &document_name)?);
    }
    Ok(docs)
}
