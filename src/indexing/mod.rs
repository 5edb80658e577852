//! Project indexing: traversal, content addressing, and orchestration.

mod hash;
mod orchestrator;
mod stages;
mod walker;

pub use hash::{DirectoryHash, DirectoryHasher, hash_string};
pub use orchestrator::IndexOrchestrator;
pub use stages::IndexContext;
pub use walker::{FileMeta, FileWalker, TraversalResult};
