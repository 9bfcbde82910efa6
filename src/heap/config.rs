/*!
 * Block Manager Configuration
 * Explicit parameters handed to the manager at construction
 */

use super::types::{HeapError, HeapResult};
use crate::core::limits::*;
use crate::core::types::Size;
use serde::{Deserialize, Serialize};

/// Block manager parameters
///
/// # Example
///
/// ```rust
/// use gpu_state_heap::BlockManagerConfig;
///
/// let config = BlockManagerConfig::default()
///     .with_granularity(64)
///     .with_min_block_size(64);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockManagerConfig {
    pub pool_initial_records: usize,
    pub pool_max_records: usize,
    pub pool_increment: usize,
    pub heap_initial_size: Size,
    pub heap_increment: Size,
    pub heap_max_total: Size,
    pub heap_max_count: usize,
    /// Block granularity; every block boundary falls on a multiple of it
    pub heap_granularity: Size,
    pub min_block_size: Size,
}

impl Default for BlockManagerConfig {
    fn default() -> Self {
        Self {
            pool_initial_records: DEFAULT_POOL_INITIAL_RECORDS,
            pool_max_records: DEFAULT_POOL_MAX_RECORDS,
            pool_increment: DEFAULT_POOL_INCREMENT,
            heap_initial_size: DEFAULT_HEAP_INITIAL_SIZE,
            heap_increment: DEFAULT_HEAP_INCREMENT,
            heap_max_total: DEFAULT_HEAP_MAX_TOTAL,
            heap_max_count: DEFAULT_HEAP_MAX_COUNT,
            heap_granularity: DEFAULT_HEAP_GRANULARITY,
            min_block_size: DEFAULT_MIN_BLOCK_SIZE,
        }
    }
}

impl BlockManagerConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> HeapResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HeapError::InvalidParameter(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_granularity(mut self, granularity: Size) -> Self {
        self.heap_granularity = granularity;
        self
    }

    pub fn with_min_block_size(mut self, size: Size) -> Self {
        self.min_block_size = size;
        self
    }

    pub fn with_pool(mut self, initial: usize, increment: usize, max: usize) -> Self {
        self.pool_initial_records = initial;
        self.pool_increment = increment;
        self.pool_max_records = max;
        self
    }

    pub fn with_heap_sizes(mut self, initial: Size, increment: Size) -> Self {
        self.heap_initial_size = initial;
        self.heap_increment = increment;
        self
    }

    pub fn with_heap_limits(mut self, max_count: usize, max_total: Size) -> Self {
        self.heap_max_count = max_count;
        self.heap_max_total = max_total;
        self
    }

    pub fn validate(&self) -> HeapResult<()> {
        if self.heap_granularity == 0 || !self.heap_granularity.is_power_of_two() {
            return Err(HeapError::InvalidParameter(format!(
                "heap granularity {} is not a power of two",
                self.heap_granularity
            )));
        }
        if self.min_block_size == 0 {
            return Err(HeapError::InvalidParameter(
                "min block size must be non-zero".into(),
            ));
        }
        if self.pool_increment == 0 || self.pool_max_records == 0 {
            return Err(HeapError::InvalidParameter(
                "block pool increment and limit must be non-zero".into(),
            ));
        }
        if self.pool_initial_records > self.pool_max_records {
            return Err(HeapError::InvalidParameter(format!(
                "initial pool size {} exceeds pool limit {}",
                self.pool_initial_records, self.pool_max_records
            )));
        }
        if self.heap_initial_size == 0 || self.heap_increment == 0 {
            return Err(HeapError::InvalidParameter(
                "heap sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
