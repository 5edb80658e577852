//! Content addressing.
//!
//! `hash_string` keys snippets for deduplication; `DirectoryHasher`
//! derives the project id from a directory tree. The digest covers file
//! contents and root-relative paths only, so moving a tree on disk never
//! changes its id.

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pool::ResourcePool;

/// SHA-256 hex digest of a string.
pub fn hash_string(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic identity of a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryHash {
    pub hash: String,
    pub file_count: usize,
    /// Root-relative paths that contributed to the hash, sorted.
    pub files: Vec<PathBuf>,
}

/// Hashes files and directory trees, drawing read buffers from the
/// shared scratch pool instead of allocating per file.
pub struct DirectoryHasher {
    buffers: Arc<ResourcePool<Vec<u8>>>,
}

impl DirectoryHasher {
    pub fn new(buffers: Arc<ResourcePool<Vec<u8>>>) -> Self {
        Self { buffers }
    }

    /// SHA-256 hex digest of one file's content.
    pub fn hash_file(&self, path: &Path) -> std::io::Result<String> {
        let mut buf = self.buffers.acquire();
        let result = self.hash_file_into(path, &mut buf);
        self.buffers.release(buf);
        result
    }

    fn hash_file_into(&self, path: &Path, buf: &mut Vec<u8>) -> std::io::Result<String> {
        buf.clear();
        let mut file = std::fs::File::open(path)?;
        file.read_to_end(buf)?;

        let mut hasher = Sha256::new();
        hasher.update(&*buf);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Hash a directory tree into a stable project id.
    ///
    /// Files are visited with gitignore rules applied, keyed by their
    /// root-relative path, and folded into the digest in sorted order so
    /// traversal order cannot leak into the id.
    pub fn hash_directory(&self, root: &Path) -> std::io::Result<DirectoryHash> {
        let mut entries: Vec<(PathBuf, String)> = Vec::new();
        let mut buf = self.buffers.acquire();

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .build();

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf());

            match self.hash_file_into(path, &mut buf) {
                Ok(hash) => entries.push((relative, hash)),
                Err(e) => {
                    tracing::warn!(
                        target: "indexing",
                        "hash skipped {}: {e}",
                        path.display()
                    );
                }
            }
        }
        self.buffers.release(buf);

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (relative, hash) in &entries {
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
            hasher.update([b'\n']);
        }

        Ok(DirectoryHash {
            hash: format!("{:x}", hasher.finalize()),
            file_count: entries.len(),
            files: entries.into_iter().map(|(path, _)| path).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::fs;
    use tempfile::TempDir;

    fn hasher() -> DirectoryHasher {
        let pool = ResourcePool::builder(Vec::new)
            .with_resetter(|buf: &mut Vec<u8>| buf.clear())
            .with_config(PoolConfig::default())
            .build();
        DirectoryHasher::new(Arc::new(pool))
    }

    #[test]
    fn test_hash_string_stable() {
        assert_eq!(hash_string("abc"), hash_string("abc"));
        assert_ne!(hash_string("abc"), hash_string("abd"));
        assert_eq!(hash_string("abc").len(), 64);
    }

    #[test]
    fn test_hash_directory_stable_across_runs() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.rs"), "fn a() {}").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.rs"), "fn b() {}").unwrap();

        let hasher = hasher();
        let first = hasher.hash_directory(temp.path()).unwrap();
        let second = hasher.hash_directory(temp.path()).unwrap();

        assert_eq!(first.hash, second.hash);
        assert_eq!(first.file_count, 2);
    }

    #[test]
    fn test_hash_independent_of_absolute_path() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();
        for root in [temp_a.path(), temp_b.path()] {
            fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        }

        let hasher = hasher();
        let a = hasher.hash_directory(temp_a.path()).unwrap();
        let b = hasher.hash_directory(temp_b.path()).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("main.rs");
        fs::write(&file, "fn main() {}").unwrap();

        let hasher = hasher();
        let before = hasher.hash_directory(temp.path()).unwrap();
        fs::write(&file, "fn main() { println!(); }").unwrap();
        let after = hasher.hash_directory(temp.path()).unwrap();

        assert_ne!(before.hash, after.hash);
    }
}
