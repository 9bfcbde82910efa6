/*!
 * Scratch Space Co-allocation
 * Primary allocations placed alongside a pinned per-heap scratch block
 */

use super::super::traits::CompletionTracker;
use super::super::types::{BlockHandle, BlockState, HeapError, HeapId, HeapResult};
use super::allocator::normalize_alignment;
use super::records::heap_slot;
use super::BlockManager;
use crate::core::limits::SCRATCH_SPACE_ALIGN;
use crate::core::types::{checked_align_ceil, Offset, Size};
use crate::monitoring::span_operation;
use tracing::{debug, info};

/// How a heap's scratch reservation was changed for the current attempt
enum ScratchChange {
    Unchanged,
    /// Existing scratch grown in place from `offset..offset + size`
    Grown {
        index: usize,
        offset: Offset,
        size: Size,
        data_size: Size,
    },
    /// New scratch block replacing `previous`
    Created {
        index: usize,
        previous: Option<usize>,
        previous_size: Size,
    },
}

impl<T: CompletionTracker> BlockManager<T> {
    /// Allocate a block in a heap whose scratch space holds `scratch_size` bytes
    ///
    /// Heaps are tried most recent first. In each, the scratch block is grown
    /// in place when possible, otherwise a new pinned scratch block is carved
    /// from the free space nearest the heap's end and the old one is released.
    /// The primary block is then allocated in the same heap. A heap where
    /// either step fails is restored and the next heap is tried.
    pub fn allocate_with_scratch(
        &mut self,
        size: Size,
        alignment: Size,
        scratch_size: Size,
    ) -> HeapResult<BlockHandle> {
        if size == 0 {
            return Err(HeapError::InvalidParameter(
                "allocation size must be non-zero".into(),
            ));
        }
        let granularity = self.config.heap_granularity;
        let alignment = match normalize_alignment(alignment)? {
            a if a < granularity => 1,
            a => a,
        };

        let block_needed = size
            .checked_add(alignment - 1)
            .and_then(|padded| checked_align_ceil(padded, granularity));
        let scratch_full =
            scratch_size.checked_add(SCRATCH_SPACE_ALIGN.saturating_sub(granularity));
        let (Some(block_needed), Some(scratch_full)) = (block_needed, scratch_full) else {
            return Err(HeapError::NoSpace {
                requested: size.saturating_add(scratch_size),
                largest_free: self.largest_free(None),
            });
        };
        let span = span_operation("allocate_with_scratch");

        let mut tried = 0;
        for id in self.heap_ids() {
            let (shortfall, total, free) = {
                let heap = self.heap_ref(id)?;
                if heap.deletion_pending {
                    continue;
                }
                let current = heap.scratch.map_or(0, |i| self.pool.block(i).size);
                let shortfall = if scratch_size > 0 && heap.scratch_size < scratch_size {
                    scratch_full.saturating_sub(current)
                } else {
                    0
                };
                (shortfall, heap.total_size(), heap.free)
            };

            if shortfall > 0 && total < scratch_full {
                debug!(heap = %id, total, scratch_full, "Heap too small for scratch space");
                continue;
            }
            if free < shortfall.saturating_add(block_needed) {
                continue;
            }
            tried += 1;

            let change = if shortfall > 0 {
                match self.reserve_scratch(id, scratch_size, scratch_full)? {
                    Some(change) => change,
                    None => continue,
                }
            } else {
                ScratchChange::Unchanged
            };

            match self.allocate_index(size, alignment, Some(id)) {
                Ok(index) => {
                    if let ScratchChange::Created {
                        previous: Some(old),
                        ..
                    } = change
                    {
                        self.release(old)?;
                    }
                    span.record_result(true);
                    return Ok(self.pool.handle(index));
                }
                Err(e) if e.is_no_space() => self.undo_scratch(id, change)?,
                Err(e) => {
                    self.undo_scratch(id, change)?;
                    span.record_error(&e.to_string());
                    return Err(e);
                }
            }
        }

        span.record_items_processed(tried);
        span.record_result(false);
        Err(HeapError::NoSpace {
            requested: size.saturating_add(scratch_size),
            largest_free: self.largest_free(None),
        })
    }

    /// Grow the heap's scratch block or carve a new one
    ///
    /// `Ok(None)` means this heap has no room for the scratch space.
    fn reserve_scratch(
        &mut self,
        id: HeapId,
        scratch_size: Size,
        scratch_full: Size,
    ) -> HeapResult<Option<ScratchChange>> {
        let (existing, previous_size) = {
            let heap = self.heap_ref(id)?;
            (heap.scratch, heap.scratch_size)
        };

        if let Some(index) = existing {
            if self.pool.block(index).state == BlockState::Allocated {
                let (offset, size, data_size) = {
                    let block = self.pool.block(index);
                    (block.offset, block.size, block.data_size)
                };
                match self.resize_internal(index, scratch_size, SCRATCH_SPACE_ALIGN, true) {
                    Ok(()) => {
                        let grown = self.pool.block(index).data_size;
                        heap_slot(&mut self.heaps, id)?.scratch_size = grown;
                        debug!(heap = %id, scratch = grown, "Grew scratch space in place");
                        return Ok(Some(ScratchChange::Grown {
                            index,
                            offset,
                            size,
                            data_size,
                        }));
                    }
                    Err(e) if e.is_no_space() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        // Search from the heap's end so the scratch grows away from other blocks
        let mut cursor = self.heap_ref(id)?.last;
        let found = loop {
            let Some(index) = cursor else {
                break None;
            };
            let block = self.pool.block(index);
            if block.state == BlockState::Free && block.size >= scratch_full {
                break Some(index);
            }
            cursor = block.adjacency.prev;
        };
        let Some(index) = found else {
            return Ok(None);
        };

        self.split_internal(index, scratch_full, SCRATCH_SPACE_ALIGN, true)?;
        self.mark_allocated(index, SCRATCH_SPACE_ALIGN)?;
        self.pool.block_mut(index).is_static = true;

        let data_size = self.pool.block(index).data_size;
        let heap = heap_slot(&mut self.heaps, id)?;
        heap.scratch = Some(index);
        heap.scratch_size = data_size;
        info!(heap = %id, scratch = data_size, "Created scratch space");

        Ok(Some(ScratchChange::Created {
            index,
            previous: existing,
            previous_size,
        }))
    }

    fn undo_scratch(&mut self, id: HeapId, change: ScratchChange) -> HeapResult<()> {
        match change {
            ScratchChange::Unchanged => Ok(()),
            ScratchChange::Grown {
                index,
                offset,
                size,
                data_size,
            } => {
                self.restore_extent(index, offset, size)?;
                heap_slot(&mut self.heaps, id)?.scratch_size = data_size;
                Ok(())
            }
            ScratchChange::Created {
                index,
                previous,
                previous_size,
            } => {
                let heap = heap_slot(&mut self.heaps, id)?;
                heap.scratch = previous;
                heap.scratch_size = previous_size;
                self.release(index).map(|_| ())
            }
        }
    }

    /// Cut a grown block back to exactly `offset..offset + size`
    fn restore_extent(&mut self, index: usize, offset: Offset, size: Size) -> HeapResult<()> {
        if self.pool.block(index).offset < offset {
            let low = self.split_at(index, offset, SCRATCH_SPACE_ALIGN, true)?;
            self.release(low)?;
        }
        if self.pool.block(index).end() > offset + size {
            let high = self.split_at(index, offset + size, SCRATCH_SPACE_ALIGN, false)?;
            self.release(high)?;
        }
        Ok(())
    }
}
