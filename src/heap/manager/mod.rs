/*!
 * Block Manager
 *
 * Carves registered GPU state heaps into blocks and tracks every block
 * through its lifecycle.
 *
 * ## Structure
 *
 * - **Record pool**: block metadata lives in a generation-checked arena;
 *   unused records wait on the POOL list and are reused, never freed
 * - **State lists**: one index-linked list per block state
 *   (POOL, FREE, ALLOCATED, SUBMITTED, DELETED) with running count and size
 * - **Heap chain**: heaps form one logical growable arena; the most recently
 *   registered heap is the head and is searched first
 * - **Adjacency chains**: each heap keeps its blocks in address order with no
 *   gaps, so neighbours can be split and merged in O(1)
 *
 * ## Reclamation
 *
 * Blocks handed to the GPU are SUBMITTED with a completion token. `refresh`
 * returns expired blocks to FREE (merging with free neighbours) or, when
 * pinned, back to ALLOCATED. Unregistering a heap with blocks still in flight
 * defers its release until the last of them retires.
 *
 * The manager is not internally synchronized; one owner drives it.
 */

mod allocator;
mod batch;
mod records;
mod refresh;
mod registry;
mod scratch;
mod split;
mod stats;

use super::block::Block;
use super::config::BlockManagerConfig;
use super::list::BlockList;
use super::pool::MemoryPool;
use super::provider::VirtualHeapProvider;
use super::state_heap::Heap;
use super::tracker::FrameTracker;
use super::traits::{CompletionTracker, HeapProvider};
use super::types::{BlockHandle, BlockState, HeapError, HeapId, HeapResult};
use crate::core::types::GpuAddress;
use std::fmt;
use tracing::info;

/// Block manager over a chain of state heaps
///
/// # Example
///
/// ```rust
/// use gpu_state_heap::{BlockManager, BlockManagerConfig, BlockState, FrameTracker};
///
/// let tracker = FrameTracker::new();
/// let mut manager = BlockManager::new(BlockManagerConfig::default(), tracker.clone()).unwrap();
/// manager.register_heap(1024 * 1024).unwrap();
///
/// let block = manager.allocate_block(100, 16, None).unwrap();
/// let frame = tracker.issue();
/// manager.submit_block(block, frame).unwrap();
///
/// tracker.complete_through(frame);
/// let summary = manager.refresh();
/// assert_eq!(summary.reclaimed, 1);
/// assert_eq!(manager.stats().used_bytes, 0);
/// assert_eq!(manager.list(BlockState::Submitted).len(), 0);
/// ```
pub struct BlockManager<T: CompletionTracker = FrameTracker> {
    pub(super) config: BlockManagerConfig,
    pub(super) pool: MemoryPool<T::Token>,
    pub(super) lists: [BlockList; BlockState::COUNT],
    /// Indexed by `HeapId`; finalized heaps leave an empty slot
    pub(super) heaps: Vec<Option<Heap>>,
    /// Most recently registered heap
    pub(super) heap_head: Option<HeapId>,
    pub(super) tracker: T,
    pub(super) provider: Box<dyn HeapProvider>,
}

impl<T: CompletionTracker> BlockManager<T> {
    /// Create a manager backed by a `VirtualHeapProvider`
    pub fn new(config: BlockManagerConfig, tracker: T) -> HeapResult<Self> {
        config.validate()?;

        let mut manager = Self {
            pool: MemoryPool::new(config.pool_max_records),
            lists: BlockState::ALL.map(BlockList::new),
            heaps: Vec::new(),
            heap_head: None,
            tracker,
            provider: Box::new(VirtualHeapProvider::new()),
            config,
        };

        if manager.config.pool_initial_records > 0 {
            manager.extend_pool(manager.config.pool_initial_records)?;
        }

        info!(
            granularity = manager.config.heap_granularity,
            min_block = manager.config.min_block_size,
            pool_records = manager.pool.len(),
            "Block manager initialized"
        );
        Ok(manager)
    }

    /// Replace the heap provider used by `register_heap` and `grow_heap`
    pub fn with_provider<P: HeapProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Box::new(provider);
        self
    }

    pub fn config(&self) -> &BlockManagerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Block behind a handle, or `None` once the record has been recycled
    pub fn block(&self, handle: BlockHandle) -> Option<&Block<T::Token>> {
        self.pool.resolve(handle).map(|index| self.pool.block(index))
    }

    /// GPU virtual address of a block's aligned data
    pub fn gpu_address(&self, handle: BlockHandle) -> HeapResult<GpuAddress> {
        let index = self.resolve(handle)?;
        let block = self.pool.block(index);
        let heap = self.heap_ref(self.heap_of(index)?)?;
        Ok(heap.base_address() + block.data_offset() as GpuAddress)
    }

    pub fn heap(&self, id: HeapId) -> Option<&Heap> {
        self.heaps.get(id.slot()).and_then(Option::as_ref)
    }

    /// Registered heaps, most recent first
    pub fn heaps(&self) -> impl Iterator<Item = &Heap> + '_ {
        std::iter::successors(self.heap_head.and_then(|id| self.heap(id)), move |heap| {
            heap.next.and_then(|id| self.heap(id))
        })
    }

    /// Heap searched first by allocations without affinity
    pub fn active_heap(&self) -> Option<HeapId> {
        self.heap_head
    }

    /// Current scratch block of a heap
    pub fn scratch_block(&self, id: HeapId) -> Option<BlockHandle> {
        self.heap(id)
            .and_then(|heap| heap.scratch)
            .map(|index| self.pool.handle(index))
    }

    pub fn list(&self, state: BlockState) -> &BlockList {
        &self.lists[state.index()]
    }

    /// Handles of every block in `state`, in list order
    pub fn blocks_in(&self, state: BlockState) -> Vec<BlockHandle> {
        self.lists[state.index()]
            .indices(&self.pool)
            .into_iter()
            .map(|index| self.pool.handle(index))
            .collect()
    }

    /// Handles of a heap's blocks in address order
    pub fn heap_blocks(&self, id: HeapId) -> HeapResult<Vec<BlockHandle>> {
        let heap = self.heap_ref(id)?;
        Ok(heap
            .chain(&self.pool)
            .into_iter()
            .map(|index| self.pool.handle(index))
            .collect())
    }
}

impl<T: CompletionTracker> fmt::Debug for BlockManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockManager")
            .field("config", &self.config)
            .field("heaps", &self.heaps().count())
            .field("pool_records", &self.pool.len())
            .field("free", &self.lists[BlockState::Free.index()].len())
            .field("allocated", &self.lists[BlockState::Allocated.index()].len())
            .field("submitted", &self.lists[BlockState::Submitted.index()].len())
            .field("deleted", &self.lists[BlockState::Deleted.index()].len())
            .finish()
    }
}

fn stale_handle(handle: BlockHandle) -> HeapError {
    HeapError::InvalidParameter(format!("{handle} does not refer to a live block"))
}
