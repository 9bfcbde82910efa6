/*!
 * Split, Merge and Resize
 * Block surgery on a heap's adjacency chain
 */

use super::super::list::Position;
use super::super::traits::CompletionTracker;
use super::super::types::{BlockHandle, BlockState, HeapError, HeapResult};
use super::allocator::normalize_alignment;
use super::records::heap_slot;
use super::BlockManager;
use crate::core::types::{align_floor, checked_align_ceil, Offset, Size};
use tracing::{debug, trace};

impl<T: CompletionTracker> BlockManager<T> {
    /// Split a free or allocated block in two
    ///
    /// The handle keeps the `split_size` piece: the low end, or the high end
    /// when `from_end` is set. Returns the handle of the remainder, which
    /// stays in the same state.
    pub fn split_block(
        &mut self,
        handle: BlockHandle,
        split_size: Size,
        alignment: Size,
        from_end: bool,
    ) -> HeapResult<BlockHandle> {
        let index = self.resolve(handle)?;
        let alignment = normalize_alignment(alignment)?;
        match self.split_internal(index, split_size, alignment, from_end)? {
            Some(remainder) => Ok(self.pool.handle(remainder)),
            None => Err(HeapError::InvalidParameter(format!(
                "splitting {} bytes off a {} byte block leaves a fragment below {} bytes",
                split_size,
                self.pool.block(index).size,
                self.config.min_block_size
            ))),
        }
    }

    /// Split unless a fragment would fall below the minimum block size
    ///
    /// `Ok(None)` means the block was too small to split and is untouched.
    pub(super) fn split_internal(
        &mut self,
        index: usize,
        split_size: Size,
        alignment: Size,
        from_end: bool,
    ) -> HeapResult<Option<usize>> {
        let (state, offset, size, padding) = {
            let block = self.pool.block(index);
            (block.state, block.offset, block.size, block.padding)
        };
        if !matches!(state, BlockState::Free | BlockState::Allocated) {
            return Err(HeapError::invalid_state("split", state));
        }

        let min = self.config.min_block_size;
        let granularity = self.config.heap_granularity;
        let split_size = split_size.max(min);
        if size < split_size {
            return Ok(None);
        }

        let split_offset = if from_end {
            Some(align_floor(
                align_floor(offset + size - split_size, alignment),
                granularity,
            ))
        } else {
            // Data already in use stays inside the kept piece
            checked_align_ceil(offset, alignment)
                .map(|start| start.max(offset + padding))
                .and_then(|start| start.checked_add(split_size))
                .and_then(|end| checked_align_ceil(end, granularity))
        };
        let Some(split_offset) = split_offset else {
            return Ok(None);
        };
        if split_offset < offset + min || offset + size < split_offset + min {
            return Ok(None);
        }

        self.split_at(index, split_offset, alignment, from_end).map(Some)
    }

    /// Cut a block at `split_offset`; the existing record keeps the low part,
    /// or the high part when `keep_high` is set
    pub(super) fn split_at(
        &mut self,
        index: usize,
        split_offset: Offset,
        alignment: Size,
        keep_high: bool,
    ) -> HeapResult<usize> {
        let heap = self.heap_of(index)?;
        let record = self.take_record()?;
        let id = self.pool.block(record).id;
        let fragment = self.pool.block(index).fragment(id);
        *self.pool.block_mut(record) = fragment;

        let (low, high) = if keep_high {
            (record, index)
        } else {
            (index, record)
        };
        let end = self.pool.block(index).end();
        let start = self.pool.block(index).offset;
        {
            let block = self.pool.block_mut(low);
            block.offset = start;
            block.size = split_offset - start;
        }
        {
            let block = self.pool.block_mut(high);
            block.offset = split_offset;
            block.size = end - split_offset;
        }

        let state = self.pool.block(index).state;
        let moved = self.pool.block(record).size;
        let list = &mut self.lists[state.index()];
        list.shrink(moved);
        let position = if keep_high {
            Position::Before(index)
        } else {
            Position::After(index)
        };
        list.attach(&mut self.pool, record, position)?;

        let chain = heap_slot(&mut self.heaps, heap)?;
        if keep_high {
            chain.link_before(&mut self.pool, index, record);
        } else {
            chain.link_after(&mut self.pool, index, record);
        }

        if state == BlockState::Free {
            self.pool.block_mut(low).clear_data_view();
            self.pool.block_mut(high).clear_data_view();
        } else {
            let block = self.pool.block_mut(low);
            block.data_size = block.size.saturating_sub(block.padding);
            self.pool.block_mut(high).set_data_view(alignment);
        }

        trace!(
            block = self.pool.block(index).id,
            fragment = id,
            split_offset,
            "Split block"
        );
        Ok(record)
    }

    /// Merge two adjacent blocks where exactly one is free
    ///
    /// The free block is absorbed into the other: `low` into `high` when
    /// `high_into_low` is false, `high` into `low` otherwise. Returns the
    /// surviving handle.
    pub fn merge_blocks(
        &mut self,
        low: BlockHandle,
        high: BlockHandle,
        alignment: Size,
        high_into_low: bool,
    ) -> HeapResult<BlockHandle> {
        let low = self.resolve(low)?;
        let high = self.resolve(high)?;
        let alignment = normalize_alignment(alignment)?;

        if self.pool.block(low).adjacency.next != Some(high) {
            return Err(HeapError::InvalidParameter(format!(
                "block records {} and {} are not adjacent",
                self.pool.block(low).id,
                self.pool.block(high).id
            )));
        }

        let (survivor, absorbed) = if high_into_low {
            (low, high)
        } else {
            (high, low)
        };
        let absorbed_state = self.pool.block(absorbed).state;
        if absorbed_state != BlockState::Free {
            return Err(HeapError::invalid_state("merge", absorbed_state));
        }
        let survivor_state = self.pool.block(survivor).state;
        if !matches!(
            survivor_state,
            BlockState::Allocated | BlockState::Submitted
        ) {
            return Err(HeapError::invalid_state("merge", survivor_state));
        }

        self.absorb(survivor, absorbed, alignment)?;
        Ok(self.pool.handle(survivor))
    }

    /// Fold the free block `absorbed` into its neighbour `survivor`
    pub(super) fn absorb(
        &mut self,
        survivor: usize,
        absorbed: usize,
        alignment: Size,
    ) -> HeapResult<()> {
        let heap = self.heap_of(survivor)?;
        let (offset, size) = {
            let block = self.pool.block(absorbed);
            (block.offset, block.size)
        };
        let state = self.pool.block(survivor).state;

        self.lists[BlockState::Free.index()].detach(&mut self.pool, absorbed)?;
        let chain = heap_slot(&mut self.heaps, heap)?;
        chain.unlink(&mut self.pool, absorbed);
        if state != BlockState::Free {
            chain.used += size;
            chain.free -= size;
        }
        self.lists[state.index()].grow(size);

        let block = self.pool.block_mut(survivor);
        let absorbed_low = offset < block.offset;
        if absorbed_low {
            block.offset = offset;
        }
        block.size += size;
        if state == BlockState::Free {
            block.clear_data_view();
        } else if absorbed_low {
            block.set_data_view(alignment);
        } else {
            block.data_size = block.size.saturating_sub(block.padding);
        }

        self.recycle(absorbed)
    }

    /// Grow or shrink an allocated block in place
    ///
    /// Sizes count usable data bytes, after alignment padding. Shrinking
    /// splits the block and frees the excess. Growing absorbs
    /// free neighbours, forward first and then backward when
    /// `allow_backward` is set. A block that cannot reach `new_size` is left
    /// untouched and `NoSpace` is returned.
    pub fn resize_block(
        &mut self,
        handle: BlockHandle,
        new_size: Size,
        alignment: Size,
        allow_backward: bool,
    ) -> HeapResult<()> {
        let index = self.resolve(handle)?;
        let alignment = normalize_alignment(alignment)?;
        self.resize_internal(index, new_size, alignment, allow_backward)
    }

    pub(super) fn resize_internal(
        &mut self,
        index: usize,
        new_size: Size,
        alignment: Size,
        allow_backward: bool,
    ) -> HeapResult<()> {
        if new_size == 0 {
            return Err(HeapError::InvalidParameter("resize to zero bytes".into()));
        }
        let (state, data_size) = {
            let block = self.pool.block(index);
            (block.state, block.data_size)
        };
        if state != BlockState::Allocated {
            return Err(HeapError::invalid_state("resize", state));
        }

        if new_size <= data_size {
            // Blocks at the minimum size cannot shrink; that is not an error
            if new_size < data_size {
                let excess = self.split_internal(index, new_size, alignment, allow_backward)?;
                if let Some(excess) = excess {
                    self.release(excess)?;
                }
            }
            return Ok(());
        }

        let granularity = self.config.heap_granularity;
        let forward_room: Size = self
            .free_run(index, false)
            .iter()
            .map(|&i| self.pool.block(i).size)
            .sum();
        let forward_end = self.pool.block(index).end() + forward_room;
        let grow_forward = data_size + forward_room >= new_size;

        let backward_start = if grow_forward {
            None
        } else if allow_backward && forward_end >= new_size {
            let run = self.free_run(index, true);
            let reach = run
                .last()
                .map_or(self.pool.block(index).offset, |&i| self.pool.block(i).offset);
            let target = align_floor(align_floor(forward_end - new_size, alignment), granularity);
            (target >= reach).then_some(target)
        } else {
            None
        };

        if !grow_forward && backward_start.is_none() {
            debug!(
                block = self.pool.block(index).id,
                new_size,
                available = data_size + forward_room,
                "Block cannot grow in place"
            );
            return Err(HeapError::NoSpace {
                requested: new_size,
                largest_free: data_size + forward_room,
            });
        }

        // At most one split on each side
        self.reserve_records(2)?;

        while self.pool.block(index).data_size < new_size {
            let Some(next) = self.free_neighbour(index, false) else {
                break;
            };
            let need = new_size - self.pool.block(index).data_size;
            if self.pool.block(next).size > need {
                self.split_internal(next, need, 1, false)?;
            }
            self.absorb(index, next, alignment)?;
        }

        if let Some(target) = backward_start {
            while self.pool.block(index).offset > target {
                let Some(prev) = self.free_neighbour(index, true) else {
                    break;
                };
                let prev_end = self.pool.block(prev).end();
                if self.pool.block(prev).offset < target {
                    self.split_internal(prev, prev_end - target, 1, true)?;
                }
                self.absorb(index, prev, alignment)?;
            }
            // The target may fall inside the block's own padding
            self.pool.block_mut(index).set_data_view(alignment);
        }

        trace!(
            block = self.pool.block(index).id,
            size = self.pool.block(index).size,
            data_size = self.pool.block(index).data_size,
            "Resized block"
        );
        Ok(())
    }

    fn free_neighbour(&self, index: usize, backward: bool) -> Option<usize> {
        let links = self.pool.block(index).adjacency;
        let neighbour = if backward { links.prev } else { links.next }?;
        (self.pool.block(neighbour).state == BlockState::Free).then_some(neighbour)
    }

    /// Contiguous free blocks next to `index`, nearest first
    fn free_run(&self, index: usize, backward: bool) -> Vec<usize> {
        let mut run = Vec::new();
        let mut cursor = index;
        while let Some(neighbour) = self.free_neighbour(cursor, backward) {
            run.push(neighbour);
            cursor = neighbour;
        }
        run
    }
}
