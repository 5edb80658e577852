pub mod batch;
pub mod config;
pub mod indexing;
pub mod logging;
pub mod memory;
pub mod parsing;
pub mod pipeline;
pub mod pool;
pub mod storage;
pub mod types;
pub mod watcher;

pub use batch::{BatchExecutor, BatchOptions, BatchReport};
pub use config::Settings;
pub use indexing::{DirectoryHasher, FileWalker, IndexOrchestrator, hash_string};
pub use memory::{MemoryMonitor, MemoryStatus, MemoryThresholds};
pub use parsing::{ChunkingParser, Language, ParsedSource, Snippet, SourceParser};
pub use pipeline::{Pipeline, Stage, StagePolicy};
pub use pool::{PoolConfig, ResourcePool};
pub use storage::{ArtifactStore, MemoryStore};
pub use types::*;
pub use watcher::ChangeWatcher;
