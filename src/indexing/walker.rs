//! File system traversal for discovering source files to index.
//!
//! Built on the `ignore` crate for .gitignore support, with custom
//! include/exclude globs from configuration, a file size cap, and
//! hidden-file handling.

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::hash::DirectoryHasher;
use crate::config::IndexingConfig;
use crate::parsing::Language;

/// Metadata for one discovered file.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub size: u64,
    /// SHA-256 of the file content.
    pub hash: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub language: Language,
}

/// Everything found by one traversal pass.
#[derive(Debug, Clone, Default)]
pub struct TraversalResult {
    pub files: Vec<FileMeta>,
    pub directories: Vec<PathBuf>,
    /// Paths that could not be read, with the reason.
    pub errors: Vec<String>,
    pub total_size: u64,
    pub elapsed: std::time::Duration,
}

impl TraversalResult {
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Walks directories to find files to index.
pub struct FileWalker {
    config: IndexingConfig,
    hasher: Arc<DirectoryHasher>,
}

impl FileWalker {
    pub fn new(config: IndexingConfig, hasher: Arc<DirectoryHasher>) -> Self {
        Self { config, hasher }
    }

    /// Walk `root` and collect file metadata.
    ///
    /// Unreadable entries land in `errors` rather than failing the pass.
    pub fn traverse(&self, root: &Path) -> TraversalResult {
        let start = Instant::now();
        let mut result = TraversalResult::default();

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        if !self.config.recursive {
            builder.max_depth(Some(1));
        }

        // Include/exclude globs layered as overrides; includes are plain
        // patterns, excludes are negated.
        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.config.include_patterns {
            if let Err(e) = override_builder.add(pattern) {
                tracing::warn!(target: "indexing", "invalid include pattern '{pattern}': {e}");
            }
        }
        for pattern in &self.config.exclude_patterns {
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                tracing::warn!(target: "indexing", "invalid exclude pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                if path != root {
                    result.directories.push(path.to_path_buf());
                }
                continue;
            }
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    result.errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            if metadata.len() > self.config.max_file_size {
                tracing::debug!(
                    target: "indexing",
                    "skipping {} ({} bytes over limit)",
                    path.display(),
                    metadata.len()
                );
                continue;
            }

            let hash = match self.hasher.hash_file(path) {
                Ok(hash) => hash,
                Err(e) => {
                    result.errors.push(format!("{}: {e}", path.display()));
                    continue;
                }
            };

            let relative_path = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf());

            result.total_size += metadata.len();
            result.files.push(FileMeta {
                path: path.to_path_buf(),
                relative_path,
                size: metadata.len(),
                hash,
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                language: Language::from_path(path),
            });
        }

        // Stable order regardless of filesystem enumeration.
        result.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        result.elapsed = start.elapsed();

        tracing::debug!(
            target: "indexing",
            "traversal found {} files ({} bytes) in {:?}",
            result.files.len(),
            result.total_size,
            result.elapsed
        );

        result
    }

    /// Count files that would be indexed (useful for dry runs).
    pub fn count_files(&self, root: &Path) -> usize {
        self.traverse(root).files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, ResourcePool};
    use std::fs;
    use tempfile::TempDir;

    fn walker(config: IndexingConfig) -> FileWalker {
        let pool = ResourcePool::builder(Vec::new)
            .with_resetter(|buf: &mut Vec<u8>| buf.clear())
            .with_config(PoolConfig::default())
            .build();
        FileWalker::new(config, Arc::new(DirectoryHasher::new(Arc::new(pool))))
    }

    #[test]
    fn test_traverse_collects_metadata() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::create_dir(root.join("src")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn lib() {}").unwrap();

        let result = walker(IndexingConfig::default()).traverse(root);

        assert_eq!(result.files.len(), 2);
        assert_eq!(result.directories.len(), 1);
        assert!(result.errors.is_empty());
        assert!(result.total_size > 0);

        let main = &result.files[0];
        assert_eq!(main.relative_path, PathBuf::from("main.rs"));
        assert_eq!(main.language, Language::Rust);
        assert_eq!(main.hash.len(), 64);
    }

    #[test]
    fn test_exclude_patterns_respected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("target")).unwrap();
        fs::write(root.join("target/out.rs"), "fn generated() {}").unwrap();
        fs::write(root.join("kept.rs"), "fn kept() {}").unwrap();

        let result = walker(IndexingConfig::default()).traverse(root);

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, PathBuf::from("kept.rs"));
    }

    #[test]
    fn test_max_file_size_skips_large_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("big.rs"), "x".repeat(4096)).unwrap();
        fs::write(root.join("small.rs"), "fn s() {}").unwrap();

        let config = IndexingConfig {
            max_file_size: 1024,
            ..IndexingConfig::default()
        };
        let result = walker(config).traverse(root);

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, PathBuf::from("small.rs"));
    }

    #[test]
    fn test_non_recursive_stays_at_top_level() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("top.rs"), "fn top() {}").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested/deep.rs"), "fn deep() {}").unwrap();

        let config = IndexingConfig {
            recursive: false,
            ..IndexingConfig::default()
        };
        let result = walker(config).traverse(root);

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, PathBuf::from("top.rs"));
    }

    #[test]
    fn test_gitignore_respected() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join(".gitignore"), "ignored.rs\n").unwrap();
        fs::write(root.join("ignored.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join("included.rs"), "fn included() {}").unwrap();

        let result = walker(IndexingConfig::default()).traverse(root);

        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, PathBuf::from("included.rs"));
    }
}
