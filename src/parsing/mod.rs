//! Parser seam and snippet types.
//!
//! Language-specific AST extraction is an external collaborator; the core
//! only depends on the [`SourceParser`] trait. The built-in
//! [`ChunkingParser`] produces language-agnostic sliding-window snippets so
//! the engine is usable end-to-end without a real AST backend.

mod chunker;
mod enhance;

pub use chunker::ChunkingParser;
pub use enhance::{EnhanceError, NoopEnhancer, SnippetEnhancer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source language, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Markdown,
    #[default]
    Unknown,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("rs") => Self::Rust,
            Some("py") | Some("pyi") => Self::Python,
            Some("js") | Some("jsx") | Some("mjs") => Self::JavaScript,
            Some("ts") | Some("tsx") => Self::TypeScript,
            Some("go") => Self::Go,
            Some("java") => Self::Java,
            Some("c") | Some("h") => Self::C,
            Some("cc") | Some("cpp") | Some("hpp") | Some("cxx") => Self::Cpp,
            Some("md") => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Markdown => "markdown",
            Self::Unknown => "unknown",
        }
    }
}

/// A unit of extracted code content, persisted and made searchable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Stable id derived from content hash and position.
    pub id: String,
    /// SHA-256 of the snippet content, the sole duplicate criterion.
    pub content_hash: String,
    pub file_path: PathBuf,
    pub relative_path: PathBuf,
    pub language: Language,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

/// Everything extracted from one source file.
///
/// The AST-shaped fields (functions, classes, imports, exports) are filled
/// by real language backends; the built-in chunker leaves them empty.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub file_path: PathBuf,
    pub relative_path: PathBuf,
    pub language: Language,
    pub snippets: Vec<Snippet>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ParsedSource {
    pub fn snippet_count(&self) -> usize {
        self.snippets.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8")]
    NotUtf8 { path: PathBuf },
}

/// Parsing collaborator.
///
/// Implementations return one entry per successfully parsed path; failed
/// files are omitted and logged, and the caller accounts for the gap.
#[async_trait]
pub trait SourceParser: Send + Sync {
    async fn parse_files(&self, root: &Path, paths: &[PathBuf]) -> Vec<ParsedSource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path(Path::new("a/b/main.rs")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("x.tsx")), Language::TypeScript);
        assert_eq!(Language::from_path(Path::new("x.cc")), Language::Cpp);
        assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
    }
}
