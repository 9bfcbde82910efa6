/*!
 * Batch Allocation
 * Multi-block allocation and dry-run space estimation
 */

use super::super::list::Position;
use super::super::traits::CompletionTracker;
use super::super::types::{BlockHandle, BlockState, HeapAffinity, HeapError, HeapId, HeapResult};
use super::allocator::normalize_alignment;
use super::BlockManager;
use crate::core::limits::MAX_BATCH_BLOCKS;
use crate::core::types::{checked_align_ceil, Size};
use crate::monitoring::span_operation;
use tracing::debug;

/// Request indices ordered by size, largest first; ties keep request order
pub(super) fn descending_order(sizes: &[Size]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]));
    order
}

/// Validate a batch and return its total size
fn check_batch(sizes: &[Size]) -> HeapResult<Size> {
    if sizes.is_empty() || sizes.len() > MAX_BATCH_BLOCKS {
        return Err(HeapError::InvalidParameter(format!(
            "batch of {} blocks (1 to {MAX_BATCH_BLOCKS} allowed)",
            sizes.len()
        )));
    }
    if sizes.contains(&0) {
        return Err(HeapError::InvalidParameter(
            "batch contains a zero-sized block".into(),
        ));
    }
    sizes
        .iter()
        .try_fold(0 as Size, |total, &size| total.checked_add(size))
        .ok_or_else(|| {
            HeapError::InvalidParameter("batch total overflows the address space".into())
        })
}

impl<T: CompletionTracker> BlockManager<T> {
    /// Allocate one block per entry of `sizes`, all or nothing
    ///
    /// Blocks are placed largest first to limit fragmentation, but the
    /// returned handles (and their order on the allocated list) follow the
    /// request order. With `HeapAffinity::SameHeap` every heap is tried in
    /// turn until one holds the whole batch.
    pub fn allocate_multiple(
        &mut self,
        sizes: &[Size],
        alignment: Size,
        affinity: HeapAffinity,
    ) -> HeapResult<Vec<BlockHandle>> {
        let total = check_batch(sizes)?;
        let alignment = normalize_alignment(alignment)?;
        let span = span_operation("allocate_multiple");
        let order = descending_order(sizes);

        let candidates: Vec<Option<HeapId>> = match affinity {
            HeapAffinity::Any => {
                let available: Size = self
                    .heaps()
                    .filter(|heap| !heap.deletion_pending)
                    .map(|heap| heap.free)
                    .sum();
                if available < total {
                    debug!(total, available, "Batch exceeds free space of all heaps");
                    vec![]
                } else {
                    vec![None]
                }
            }
            HeapAffinity::SameHeap => self.heap_ids().into_iter().map(Some).collect(),
            HeapAffinity::Heap(id) => {
                self.heap_ref(id)?;
                vec![Some(id)]
            }
        };

        for heap in candidates {
            if let Some(id) = heap {
                let heap = self.heap_ref(id)?;
                if heap.deletion_pending || heap.free < total {
                    continue;
                }
            }

            match self.allocate_in_order(sizes, &order, alignment, heap) {
                Ok(handles) => {
                    span.record_items_processed(handles.len());
                    span.record_result(true);
                    return Ok(handles);
                }
                Err(e) if e.is_no_space() => continue,
                Err(e) => {
                    span.record_error(&e.to_string());
                    return Err(e);
                }
            }
        }

        span.record_result(false);
        Err(HeapError::NoSpace {
            requested: total,
            largest_free: self.largest_free(None),
        })
    }

    /// One attempt at the whole batch; rolls back on the first failure
    fn allocate_in_order(
        &mut self,
        sizes: &[Size],
        order: &[usize],
        alignment: Size,
        heap: Option<HeapId>,
    ) -> HeapResult<Vec<BlockHandle>> {
        let mut placed: Vec<Option<usize>> = vec![None; sizes.len()];

        for &request in order {
            match self.allocate_index(sizes[request], alignment, heap) {
                Ok(index) => placed[request] = Some(index),
                Err(e) => {
                    for &index in order.iter().filter_map(|&r| placed[r].as_ref()) {
                        self.release(index)?;
                    }
                    return Err(e);
                }
            }
        }

        let indices: Vec<usize> = placed.into_iter().flatten().collect();
        for &index in &indices {
            self.move_block(index, BlockState::Allocated, Position::Tail)?;
        }
        Ok(indices.iter().map(|&index| self.pool.handle(index)).collect())
    }

    /// Bytes that must be freed or added before `sizes` fits
    ///
    /// Simulates placing the requests, largest first, into the largest
    /// remaining free block. Nothing is allocated; 0 means the batch fits.
    /// Under `SameHeap` the result is the smallest shortfall of any heap.
    pub fn calculate_space_needed(
        &self,
        sizes: &[Size],
        alignment: Size,
        affinity: HeapAffinity,
    ) -> HeapResult<Size> {
        check_batch(sizes)?;
        let alignment = normalize_alignment(alignment)?;

        match affinity {
            HeapAffinity::Any => Ok(self.shortfall(sizes, alignment, None)),
            HeapAffinity::Heap(id) => {
                self.heap_ref(id)?;
                Ok(self.shortfall(sizes, alignment, Some(id)))
            }
            HeapAffinity::SameHeap => Ok(self
                .heaps()
                .filter(|heap| !heap.deletion_pending)
                .map(|heap| self.shortfall(sizes, alignment, Some(heap.id)))
                .min()
                .unwrap_or_else(|| self.shortfall(sizes, alignment, None))),
        }
    }

    /// True when `calculate_space_needed` reports no shortfall
    pub fn can_satisfy(
        &self,
        sizes: &[Size],
        alignment: Size,
        affinity: HeapAffinity,
    ) -> HeapResult<bool> {
        Ok(self.calculate_space_needed(sizes, alignment, affinity)? == 0)
    }

    fn shortfall(&self, sizes: &[Size], alignment: Size, heap: Option<HeapId>) -> Size {
        let granularity = self.config.heap_granularity;
        let overhead = alignment.saturating_sub(granularity);

        let mut free: Vec<Size> = self.lists[BlockState::Free.index()]
            .indices(&self.pool)
            .into_iter()
            .map(|index| self.pool.block(index))
            .filter(|block| heap.map_or(true, |id| block.heap == Some(id)))
            .map(|block| block.size)
            .collect();
        free.sort_unstable_by(|a, b| b.cmp(a));

        let mut needed: Size = 0;
        for request in descending_order(sizes) {
            let alloc = sizes[request]
                .checked_add(overhead)
                .and_then(|padded| checked_align_ceil(padded, granularity))
                .unwrap_or(Size::MAX)
                .max(self.config.min_block_size);

            match free.first() {
                Some(&largest) if alloc <= largest => {
                    // Sink the shrunken block to keep the list sorted
                    let remaining = largest - alloc;
                    let mut slot = 0;
                    while slot + 1 < free.len() && free[slot + 1] > remaining {
                        free[slot] = free[slot + 1];
                        slot += 1;
                    }
                    free[slot] = remaining;
                }
                _ => needed = needed.saturating_add(alloc),
            }
        }
        needed
    }
}
