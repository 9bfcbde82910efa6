/*!
 * Block Allocator Implementation
 * Single block allocation, release, submission and consolidation
 */

use super::super::list::Position;
use super::super::traits::CompletionTracker;
use super::super::types::{BlockHandle, BlockState, HeapError, HeapId, HeapResult};
use super::records::heap_slot;
use super::BlockManager;
use crate::core::types::{align_offset, checked_align_ceil, Size};
use tracing::{debug, trace, warn};

/// What releasing a block did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Release {
    /// Returned to the free list and merged with free neighbours
    Freed,
    /// Still in flight; unpinned so refresh frees it on expiry
    Deferred,
    /// Parked on the deleted list of a heap pending deletion
    Deleted,
    /// Last block of a heap pending deletion; the heap is gone
    HeapReleased,
}

/// Round an alignment request up to a power of two (0 means 1)
pub(super) fn normalize_alignment(alignment: Size) -> HeapResult<Size> {
    alignment
        .max(1)
        .checked_next_power_of_two()
        .ok_or_else(|| HeapError::InvalidParameter(format!("alignment {alignment} is too large")))
}

impl<T: CompletionTracker> BlockManager<T> {
    /// Allocate a block of at least `size` data bytes aligned to `alignment`
    ///
    /// First fit over the free list, restricted to `heap` when given. A
    /// larger block is split and its tail stays free. Fails with
    /// `NoSpace` when nothing fits; growing the heap chain is up to the caller.
    pub fn allocate_block(
        &mut self,
        size: Size,
        alignment: Size,
        heap: Option<HeapId>,
    ) -> HeapResult<BlockHandle> {
        let index = self.allocate_index(size, alignment, heap)?;
        Ok(self.pool.handle(index))
    }

    pub(super) fn allocate_index(
        &mut self,
        size: Size,
        alignment: Size,
        heap: Option<HeapId>,
    ) -> HeapResult<usize> {
        if size == 0 {
            return Err(HeapError::InvalidParameter(
                "allocation size must be non-zero".into(),
            ));
        }
        let alignment = normalize_alignment(alignment)?;
        if let Some(id) = heap {
            self.heap_ref(id)?;
        }

        let found = self
            .search_size(size, alignment)
            .and_then(|search| self.find_free(search, heap));
        let Some(index) = found else {
            let largest_free = self.largest_free(heap);
            debug!(size, alignment, largest_free, "No free block fits the request");
            return Err(HeapError::NoSpace {
                requested: size,
                largest_free,
            });
        };

        self.claim(index, size, alignment)?;
        trace!(
            block = self.pool.block(index).id,
            offset = self.pool.block(index).offset,
            size = self.pool.block(index).size,
            "Allocated block"
        );
        Ok(index)
    }

    /// Worst-case free block size needed to hold `size` aligned bytes
    ///
    /// `None` when the request overflows the address space.
    pub(super) fn search_size(&self, size: Size, alignment: Size) -> Option<Size> {
        let granularity = self.config.heap_granularity;
        let search = if alignment <= granularity {
            size
        } else {
            size.checked_add(alignment - granularity)?
        };
        Some(search.max(self.config.min_block_size))
    }

    /// First free block of at least `search` bytes, optionally in one heap
    fn find_free(&self, search: Size, heap: Option<HeapId>) -> Option<usize> {
        let mut cursor = self.lists[BlockState::Free.index()].head();
        while let Some(index) = cursor {
            let block = self.pool.block(index);
            if heap.map_or(true, |id| block.heap == Some(id)) && block.size >= search {
                return Some(index);
            }
            cursor = block.list.next;
        }
        None
    }

    pub(super) fn largest_free(&self, heap: Option<HeapId>) -> Size {
        self.lists[BlockState::Free.index()]
            .indices(&self.pool)
            .into_iter()
            .map(|index| self.pool.block(index))
            .filter(|block| heap.map_or(true, |id| block.heap == Some(id)))
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Trim a free block to the request and move it to the allocated list
    fn claim(&mut self, index: usize, size: Size, alignment: Size) -> HeapResult<()> {
        let (offset, block_size) = {
            let block = self.pool.block(index);
            (block.offset, block.size)
        };
        let adjust = align_offset(offset, alignment);
        let alloc = checked_align_ceil(size.saturating_add(adjust), self.config.heap_granularity)
            .unwrap_or(block_size)
            .max(self.config.min_block_size)
            .min(block_size);

        if block_size > alloc {
            // A remainder below the minimum block size stays attached
            self.split_internal(index, alloc, 1, false)?;
        }
        self.mark_allocated(index, alignment)
    }

    /// Free to allocated transition with heap accounting
    pub(super) fn mark_allocated(&mut self, index: usize, alignment: Size) -> HeapResult<()> {
        let heap = self.heap_of(index)?;
        self.move_block(index, BlockState::Allocated, Position::Tail)?;

        let block = self.pool.block_mut(index);
        block.pending_delete = false;
        block.is_static = false;
        block.token = None;
        block.set_data_view(alignment);
        let size = block.size;

        let heap = heap_slot(&mut self.heaps, heap)?;
        heap.used += size;
        heap.free -= size;
        Ok(())
    }

    /// Release an allocated block
    ///
    /// A submitted block whose token has not expired is only unpinned; the
    /// next `refresh` after expiry frees it.
    pub fn free_block(&mut self, handle: BlockHandle) -> HeapResult<()> {
        let index = self.resolve(handle)?;
        match self.release(index) {
            Ok(Release::Deferred) => {
                debug!(block = %handle, "Free deferred until the block retires");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(block = %handle, error = %e, "Rejected block free");
                Err(e)
            }
        }
    }

    pub(super) fn release(&mut self, index: usize) -> HeapResult<Release> {
        let (state, size, expired, pending_delete) = {
            let block = self.pool.block(index);
            let expired = block
                .token
                .as_ref()
                .map_or(true, |token| self.tracker.is_expired(token));
            (block.state, block.size, expired, block.pending_delete)
        };

        match state {
            BlockState::Submitted if !expired => {
                self.pool.block_mut(index).is_static = false;
                return Ok(Release::Deferred);
            }
            BlockState::Submitted | BlockState::Allocated => {}
            state => return Err(HeapError::invalid_state("free", state)),
        }

        let heap_id = self.heap_of(index)?;
        {
            let heap = heap_slot(&mut self.heaps, heap_id)?;
            if heap.scratch == Some(index) {
                heap.scratch = None;
                heap.scratch_size = 0;
            }
        }

        if pending_delete {
            self.move_block(index, BlockState::Deleted, Position::Tail)?;
            let heap = heap_slot(&mut self.heaps, heap_id)?;
            heap.used -= size;
            if heap.deletion_pending && heap.used == 0 {
                self.finalize_heap(heap_id)?;
                return Ok(Release::HeapReleased);
            }
            return Ok(Release::Deleted);
        }

        self.move_block(index, BlockState::Free, Position::Tail)?;
        {
            let block = self.pool.block_mut(index);
            block.is_static = false;
            block.token = None;
            block.clear_data_view();
        }
        {
            let heap = heap_slot(&mut self.heaps, heap_id)?;
            heap.used -= size;
            heap.free += size;
        }
        self.consolidate(index)?;
        Ok(Release::Freed)
    }

    /// Merge a free block with its free neighbours, returning the survivor
    pub(super) fn consolidate(&mut self, index: usize) -> HeapResult<usize> {
        while let Some(prev) = self.pool.block(index).adjacency.prev {
            if self.pool.block(prev).state != BlockState::Free {
                break;
            }
            self.absorb(index, prev, 1)?;
        }
        while let Some(next) = self.pool.block(index).adjacency.next {
            if self.pool.block(next).state != BlockState::Free {
                break;
            }
            self.absorb(index, next, 1)?;
        }
        Ok(index)
    }

    /// Hand a block to the GPU until `token` expires
    ///
    /// A block that is already submitted keeps the later of its current
    /// token and `token`.
    pub fn submit_block(&mut self, handle: BlockHandle, token: T::Token) -> HeapResult<()> {
        let index = self.resolve(handle)?;
        let (state, current) = {
            let block = self.pool.block(index);
            (block.state, block.token)
        };

        let token = match (state, current) {
            (BlockState::Submitted, Some(current)) => self.tracker.merge(current, token),
            (BlockState::Allocated | BlockState::Submitted, _) => token,
            (state, _) => {
                warn!(block = %handle, %state, "Rejected block submission");
                return Err(HeapError::invalid_state("submit", state));
            }
        };

        self.move_block(index, BlockState::Submitted, Position::Tail)?;
        self.pool.block_mut(index).token = Some(token);
        trace!(block = %handle, ?token, "Submitted block");
        Ok(())
    }

    /// Pin or unpin a block
    ///
    /// Refresh moves an expired pinned block back to the allocated list
    /// instead of freeing it.
    pub fn set_static(&mut self, handle: BlockHandle, pinned: bool) -> HeapResult<()> {
        let index = self.resolve(handle)?;
        let block = self.pool.block_mut(index);
        match block.state {
            BlockState::Allocated | BlockState::Submitted => {
                block.is_static = pinned;
                Ok(())
            }
            state => Err(HeapError::invalid_state("pin", state)),
        }
    }
}
