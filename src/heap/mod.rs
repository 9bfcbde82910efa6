/*!
 * State Heap Management
 *
 * Block allocator for GPU state heaps: a record pool, per-state block
 * lists, address-ordered heap chains and the block manager that drives
 * them.
 */

pub mod block;
pub mod config;
pub mod list;
pub mod manager;
pub mod pool;
pub mod provider;
pub mod state_heap;
pub mod tracker;
pub mod traits;
pub mod types;

pub use block::Block;
pub use config::BlockManagerConfig;
pub use list::BlockList;
pub use manager::BlockManager;
pub use pool::MemoryPool;
pub use provider::VirtualHeapProvider;
pub use state_heap::Heap;
pub use tracker::{FrameToken, FrameTracker};
pub use traits::{CompletionTracker, HeapGrant, HeapProvider};
pub use types::{
    BlockHandle, BlockManagerStats, BlockState, HeapAffinity, HeapError, HeapId, HeapPressure,
    HeapResult, ListStats, RefreshSummary, UnregisterStatus,
};
