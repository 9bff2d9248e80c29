//! Index configuration.
//!
//! `IndexConfig` is designed to be loadable from JSON with per-field
//! defaults, so partial configuration documents work out of the box.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::disk::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_SIZE, MAX_OBJECTS_PER_PAGE,
};
use crate::error::{UrbisError, UrbisResult};

/// How the disk manager picks a track for a newly allocated page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    /// Track whose centroid is closest to the page centroid.
    NearestTrack,
    /// Track whose extent grows the least when the centroid is added.
    #[default]
    BestFit,
    /// The most recently created track, while it has capacity.
    Sequential,
    /// Always start a new track.
    NewTrack,
}

/// Configuration for a spatial index.
///
/// # Example
///
/// ```rust
/// use urbis::IndexConfig;
///
/// let config = IndexConfig::from_json(r#"{
///     "block_size": 256,
///     "strategy": "nearest-track"
/// }"#).unwrap();
/// assert_eq!(config.block_size, 256);
/// assert_eq!(config.page_capacity, 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum object centroids per KD block.
    #[serde(default = "IndexConfig::default_block_size")]
    pub block_size: usize,

    /// Objects per page; bounded above by the compiled page format limit.
    #[serde(default = "IndexConfig::default_page_capacity")]
    pub page_capacity: usize,

    /// Pages retained by the LRU cache.
    #[serde(default = "IndexConfig::default_cache_size")]
    pub cache_size: usize,

    /// Build and maintain the page quadtree.
    #[serde(default = "IndexConfig::default_enable_quadtree")]
    pub enable_quadtree: bool,

    /// Open and maintain a backing file.
    #[serde(default)]
    pub persist: bool,

    /// Backing file path, required when `persist` is set.
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// Page allocation strategy.
    #[serde(default)]
    pub strategy: AllocationStrategy,

    /// Sync the backing file after every mutating operation.
    #[serde(default)]
    pub sync_on_write: bool,

    /// Reserved; memory-mapped I/O is not implemented and the flag has no
    /// effect.
    #[serde(default)]
    pub use_mmap: bool,
}

impl IndexConfig {
    const fn default_block_size() -> usize {
        DEFAULT_BLOCK_SIZE
    }

    const fn default_page_capacity() -> usize {
        MAX_OBJECTS_PER_PAGE
    }

    const fn default_cache_size() -> usize {
        DEFAULT_CACHE_SIZE
    }

    const fn default_enable_quadtree() -> bool {
        true
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_page_capacity(mut self, page_capacity: usize) -> Self {
        self.page_capacity = page_capacity;
        self
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn with_quadtree(mut self, enabled: bool) -> Self {
        self.enable_quadtree = enabled;
        self
    }

    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist = true;
        self.data_path = Some(path.into());
        self
    }

    pub fn with_sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    /// Checks the configuration for impossible values.
    pub fn validate(&self) -> UrbisResult<()> {
        if self.block_size == 0 {
            return Err(UrbisError::InvalidArg(
                "block_size must be at least 1".to_string(),
            ));
        }
        if self.page_capacity == 0 || self.page_capacity > MAX_OBJECTS_PER_PAGE {
            return Err(UrbisError::InvalidArg(format!(
                "page_capacity must be in 1..={}",
                MAX_OBJECTS_PER_PAGE
            )));
        }
        if self.cache_size == 0 {
            return Err(UrbisError::InvalidArg(
                "cache_size must be at least 1".to_string(),
            ));
        }
        if self.persist && self.data_path.is_none() {
            return Err(UrbisError::InvalidArg(
                "persist requires data_path".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads and validates a configuration from JSON.
    pub fn from_json(json: &str) -> UrbisResult<Self> {
        let config: IndexConfig = serde_json::from_str(json).map_err(|e| {
            UrbisError::parse_at(e.line(), e.column(), e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> UrbisResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| UrbisError::InvalidArg(e.to_string()))
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            block_size: Self::default_block_size(),
            page_capacity: Self::default_page_capacity(),
            cache_size: Self::default_cache_size(),
            enable_quadtree: Self::default_enable_quadtree(),
            persist: false,
            data_path: None,
            strategy: AllocationStrategy::default(),
            sync_on_write: false,
            use_mmap: false,
        }
    }
}
