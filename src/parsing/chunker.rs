//! Sliding-window snippet extraction.
//!
//! Splits file content into overlapping line windows. This is the fallback
//! chunking strategy real AST backends refine; it keeps the engine fully
//! functional for any text file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Language, ParseError, ParsedSource, Snippet, SourceParser};
use crate::config::IndexingConfig;
use crate::indexing::hash_string;

/// Line-based chunking parser.
///
/// Windows of `chunk_size` lines advance by `chunk_size - overlap_size`
/// lines, so consecutive snippets share `overlap_size` lines of context.
pub struct ChunkingParser {
    chunk_size: usize,
    overlap_size: usize,
}

impl ChunkingParser {
    pub fn new(chunk_size: usize, overlap_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            // Overlap must leave the window moving forward.
            overlap_size: overlap_size.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &IndexingConfig) -> Self {
        Self::new(config.chunk_size, config.overlap_size)
    }

    /// Chunk one file's content into snippets.
    pub fn chunk(&self, content: &str, path: &Path, relative_path: &Path) -> Vec<Snippet> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let language = Language::from_path(path);
        let step = self.chunk_size - self.overlap_size;
        let mut snippets = Vec::new();
        let mut start = 0usize;

        loop {
            let end = (start + self.chunk_size).min(lines.len());
            let body = lines[start..end].join("\n");
            let content_hash = hash_string(&body);

            snippets.push(Snippet {
                id: format!("{}:{}", &content_hash[..16], start + 1),
                content_hash,
                file_path: path.to_path_buf(),
                relative_path: relative_path.to_path_buf(),
                language,
                start_line: (start + 1) as u32,
                end_line: end as u32,
                content: body,
            });

            if end == lines.len() {
                break;
            }
            start += step;
        }

        snippets
    }

    fn parse_one(&self, root: &Path, path: &Path) -> Result<ParsedSource, ParseError> {
        let bytes = std::fs::read(path).map_err(|e| ParseError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| ParseError::NotUtf8 {
            path: path.to_path_buf(),
        })?;

        let relative_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf());

        Ok(ParsedSource {
            file_path: path.to_path_buf(),
            relative_path: relative_path.clone(),
            language: Language::from_path(path),
            snippets: self.chunk(&content, path, &relative_path),
            ..ParsedSource::default()
        })
    }
}

#[async_trait]
impl SourceParser for ChunkingParser {
    async fn parse_files(&self, root: &Path, paths: &[PathBuf]) -> Vec<ParsedSource> {
        let mut parsed = Vec::with_capacity(paths.len());
        for path in paths {
            match self.parse_one(root, path) {
                Ok(source) => parsed.push(source),
                Err(e) => {
                    tracing::warn!(target: "parsing", "skipping {}: {e}", path.display());
                }
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn numbered_lines(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_chunk_windows_and_overlap() {
        let parser = ChunkingParser::new(10, 2);
        let content = numbered_lines(25);
        let snippets = parser.chunk(&content, Path::new("a.rs"), Path::new("a.rs"));

        // Windows advance by 8: [1..10], [9..18], [17..25].
        assert_eq!(snippets.len(), 3);
        assert_eq!((snippets[0].start_line, snippets[0].end_line), (1, 10));
        assert_eq!((snippets[1].start_line, snippets[1].end_line), (9, 18));
        assert_eq!((snippets[2].start_line, snippets[2].end_line), (17, 25));
        assert!(snippets[0].content.ends_with("line 10"));
        assert!(snippets[1].content.starts_with("line 9"));
    }

    #[test]
    fn test_short_file_is_one_snippet() {
        let parser = ChunkingParser::new(100, 10);
        let snippets = parser.chunk("fn main() {}", Path::new("m.rs"), Path::new("m.rs"));
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language, Language::Rust);
        assert_eq!((snippets[0].start_line, snippets[0].end_line), (1, 1));
    }

    #[test]
    fn test_empty_file_yields_no_snippets() {
        let parser = ChunkingParser::new(10, 2);
        assert!(parser.chunk("", Path::new("e.rs"), Path::new("e.rs")).is_empty());
    }

    #[test]
    fn test_identical_content_hashes_identically() {
        let parser = ChunkingParser::new(10, 0);
        let a = parser.chunk("same content", Path::new("a.rs"), Path::new("a.rs"));
        let b = parser.chunk("same content", Path::new("b.rs"), Path::new("b.rs"));
        assert_eq!(a[0].content_hash, b[0].content_hash);
    }

    #[tokio::test]
    async fn test_parse_files_skips_unreadable() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("ok.rs"), "fn ok() {}").unwrap();

        let parser = ChunkingParser::new(50, 5);
        let parsed = parser
            .parse_files(
                root,
                &[root.join("ok.rs"), root.join("missing.rs")],
            )
            .await;

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].relative_path, PathBuf::from("ok.rs"));
        assert_eq!(parsed[0].snippet_count(), 1);
    }
}
