//! Configuration module for the indexing engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `QUARRY_` and use double
//! underscores to separate nested levels:
//! - `QUARRY_BATCH__MAX_CONCURRENCY=8` sets `batch.max_concurrency`
//! - `QUARRY_MEMORY__WARNING_PERCENT=75` sets `memory.warning_percent`
//! - `QUARRY_INDEXING__ENABLE_LSP=false` sets `indexing.enable_lsp`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .quarry is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Traversal and chunking configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Batch executor configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Memory monitor configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Scratch buffer pool configuration
    #[serde(default)]
    pub pool: PoolSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Whether traversal descends into subdirectories
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Glob patterns to include (empty means everything)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Glob patterns to exclude during traversal
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Files larger than this are skipped (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Snippet window size in lines
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive snippets in lines
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,

    /// Enable the LSP-style enhancement stage
    #[serde(default = "default_false")]
    pub enable_lsp: bool,

    /// Per-file timeout for the enhancement stage (milliseconds)
    #[serde(default = "default_lsp_timeout_ms")]
    pub lsp_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BatchConfig {
    /// Number of items handed to one processor invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on in-flight tasks
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-task timeout (milliseconds)
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Additional attempts after a task fails
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between task retries (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Memory usage (percent) above which new tasks are not admitted
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_percent: f64,

    /// Record failed tasks and keep going instead of aborting the batch
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    /// Sampling interval for the background monitor (milliseconds)
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Usage percent at which status becomes `warning`
    #[serde(default = "default_warning_percent")]
    pub warning_percent: f64,

    /// Usage percent at which status becomes `critical`
    #[serde(default = "default_critical_percent")]
    pub critical_percent: f64,

    /// Usage percent at which status becomes `emergency`
    #[serde(default = "default_emergency_percent")]
    pub emergency_percent: f64,

    /// Usage percent at which the monitor asks reclaim hooks to run
    #[serde(default = "default_gc_threshold_percent")]
    pub gc_threshold_percent: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PoolSettings {
    /// Items created up front
    #[serde(default = "default_pool_initial_size")]
    pub initial_size: usize,

    /// Maximum idle items retained
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Eviction policy for idle items beyond capacity: "lru" or "fifo"
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_chunk_size() -> usize {
    100
}
fn default_overlap_size() -> usize {
    10
}
fn default_lsp_timeout_ms() -> u64 {
    5_000
}
fn default_batch_size() -> usize {
    50
}
fn default_max_concurrency() -> usize {
    num_cpus::get().max(2)
}
fn default_task_timeout_ms() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_memory_threshold() -> f64 {
    90.0
}
fn default_check_interval_ms() -> u64 {
    5_000
}
fn default_warning_percent() -> f64 {
    70.0
}
fn default_critical_percent() -> f64 {
    85.0
}
fn default_emergency_percent() -> f64 {
    95.0
}
fn default_gc_threshold_percent() -> f64 {
    80.0
}
fn default_pool_initial_size() -> usize {
    4
}
fn default_pool_max_size() -> usize {
    16
}
fn default_eviction_policy() -> String {
    "lru".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            debug: false,
            indexing: IndexingConfig::default(),
            batch: BatchConfig::default(),
            memory: MemoryConfig::default(),
            pool: PoolSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            include_patterns: Vec::new(),
            exclude_patterns: vec![
                "target/**".to_string(),
                "node_modules/**".to_string(),
                ".git/**".to_string(),
                "*.generated.*".to_string(),
            ],
            max_file_size: default_max_file_size(),
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            enable_lsp: false,
            lsp_timeout_ms: default_lsp_timeout_ms(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            task_timeout_ms: default_task_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            memory_threshold_percent: default_memory_threshold(),
            continue_on_error: true,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            warning_percent: default_warning_percent(),
            critical_percent: default_critical_percent(),
            emergency_percent: default_emergency_percent(),
            gc_threshold_percent: default_gc_threshold_percent(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_size: default_pool_initial_size(),
            max_size: default_pool_max_size(),
            eviction_policy: default_eviction_policy(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl BatchConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl MemoryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".quarry/settings.toml"));

        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Layer in environment variables with QUARRY_ prefix.
            // Double underscore (__) separates nested levels.
            .merge(Env::prefixed("QUARRY_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUARRY_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(".quarry/settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        if let Ok(current_dir) = std::env::current_dir() {
            settings.workspace_root = Some(current_dir);
        }

        settings.save(&config_path)?;
        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!("Created default configuration at: {}", config_path.display());
        }

        Ok(config_path)
    }

    /// Find the workspace config by looking for a .quarry directory,
    /// searching from the current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".quarry");
            if config_dir.exists() && config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Get the workspace root directory (where .quarry is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".quarry");
            if config_dir.exists() && config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }
}
