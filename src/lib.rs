/*!
 * GPU State Heap Library
 * Block allocator for GPU command and state heaps
 */

pub mod core;
pub mod heap;
pub mod monitoring;

// Re-exports
pub use crate::core::types::{GpuAddress, Offset, Size};
pub use heap::{
    Block, BlockHandle, BlockManager, BlockManagerConfig, BlockManagerStats, BlockState,
    CompletionTracker, FrameToken, FrameTracker, Heap, HeapAffinity, HeapError, HeapGrant, HeapId,
    HeapPressure, HeapProvider, HeapResult, ListStats, RefreshSummary, UnregisterStatus,
    VirtualHeapProvider,
};
pub use monitoring::{init_tracing, try_init_tracing, try_init_tracing_with, TraceFormat};
