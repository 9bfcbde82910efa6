/*!
 * State Heap Types
 * Common types for block and heap management
 */

use crate::core::limits::{PRESSURE_CRITICAL_RATIO, PRESSURE_HIGH_RATIO, PRESSURE_MEDIUM_RATIO};
use crate::core::types::Size;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Heap operation result
pub type HeapResult<T> = Result<T, HeapError>;

/// Block manager errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum HeapError {
    #[error("No space: requested {requested} bytes, largest free block {largest_free} bytes")]
    #[diagnostic(
        code(heap::no_space),
        help("Grow the heap chain (or wait for submitted blocks to retire) and retry.")
    )]
    NoSpace { requested: Size, largest_free: Size },

    #[error("Invalid block state for {operation}: block is {state}")]
    #[diagnostic(
        code(heap::invalid_state),
        help("The block is not in a lifecycle state that allows this operation.")
    )]
    InvalidState {
        operation: String,
        state: BlockState,
    },

    #[error("Invalid parameter: {0}")]
    #[diagnostic(code(heap::invalid_parameter))]
    InvalidParameter(String),

    #[error("Allocation failure: {0}")]
    #[diagnostic(
        code(heap::allocation_failure),
        help("The heap provider or block record pool could not supply memory.")
    )]
    AllocationFailure(String),
}

impl HeapError {
    pub(crate) fn invalid_state(operation: &str, state: BlockState) -> Self {
        HeapError::InvalidState {
            operation: operation.to_string(),
            state,
        }
    }

    /// True for errors the caller may recover from by growing and retrying
    pub fn is_no_space(&self) -> bool {
        matches!(self, HeapError::NoSpace { .. })
    }
}

/// Lifecycle state of a block record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Detached scratch metadata, not describing any heap range
    Pool,
    Free,
    Allocated,
    /// Handed to the GPU, waiting for its completion token to expire
    Submitted,
    /// Owning heap is being torn down
    Deleted,
}

impl BlockState {
    pub const COUNT: usize = 5;

    pub const ALL: [BlockState; BlockState::COUNT] = [
        BlockState::Pool,
        BlockState::Free,
        BlockState::Allocated,
        BlockState::Submitted,
        BlockState::Deleted,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            BlockState::Pool => "POOL",
            BlockState::Free => "FREE",
            BlockState::Allocated => "ALLOCATED",
            BlockState::Submitted => "SUBMITTED",
            BlockState::Deleted => "DELETED",
        }
    }

    /// Free, allocated or submitted: the block describes a usable heap range
    #[inline]
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            BlockState::Free | BlockState::Allocated | BlockState::Submitted
        )
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of a registered heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(pub(crate) u32);

impl HeapId {
    #[inline]
    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HeapId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

/// Generation-checked reference to a block record
///
/// Records are recycled through the pool; a handle kept past the record's
/// return to the pool no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BlockHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block#{}.{}", self.index, self.generation)
    }
}

/// Heap placement constraint for batch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeapAffinity {
    /// Blocks may be spread across every heap
    #[default]
    Any,
    /// All blocks must land in one heap, any heap will do
    SameHeap,
    /// All blocks must land in this heap
    Heap(HeapId),
}

/// Result of unregistering a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnregisterStatus {
    /// Every block was reclaimable; backing storage has been released
    Released,
    /// Submitted blocks are still in flight; release happens on a later refresh
    Pending,
}

/// What one `refresh` pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Expired blocks returned to the free list
    pub reclaimed: usize,
    /// Expired static blocks moved back to the allocated list
    pub revalidated: usize,
    /// Expired blocks of heaps pending deletion
    pub deleted: usize,
    /// Submitted blocks whose token has not expired yet
    pub in_flight: usize,
    /// Heaps whose backing storage was released during this pass
    pub heaps_released: usize,
}

impl RefreshSummary {
    /// True if the pass changed nothing
    pub fn is_idle(&self) -> bool {
        self.reclaimed == 0 && self.revalidated == 0 && self.deleted == 0
    }
}

/// Per-list bookkeeping snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListStats {
    pub count: usize,
    pub bytes: Size,
}

/// Block manager statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockManagerStats {
    pub heap_count: usize,
    pub heaps_pending_deletion: usize,
    pub total_bytes: Size,
    pub used_bytes: Size,
    pub free_bytes: Size,
    pub usage_percentage: f64,
    pub largest_free_block: Size,
    pub pool_records: usize,
    pub pool_record_limit: usize,
    pub pool: ListStats,
    pub free: ListStats,
    pub allocated: ListStats,
    pub submitted: ListStats,
    pub deleted: ListStats,
}

impl BlockManagerStats {
    pub fn pressure(&self) -> HeapPressure {
        let ratio = self.usage_percentage / 100.0;
        if ratio >= PRESSURE_CRITICAL_RATIO {
            HeapPressure::Critical
        } else if ratio >= PRESSURE_HIGH_RATIO {
            HeapPressure::High
        } else if ratio >= PRESSURE_MEDIUM_RATIO {
            HeapPressure::Medium
        } else {
            HeapPressure::Low
        }
    }

    /// Free bytes split into more than one block
    pub fn is_fragmented(&self) -> bool {
        self.free.count > self.heap_count - self.heaps_pending_deletion
    }
}

/// Heap pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for HeapPressure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeapPressure::Low => write!(f, "LOW"),
            HeapPressure::Medium => write!(f, "MEDIUM"),
            HeapPressure::High => write!(f, "HIGH"),
            HeapPressure::Critical => write!(f, "CRITICAL"),
        }
    }
}
