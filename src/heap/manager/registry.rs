/*!
 * Heap Registry
 * Heap registration, growth and teardown
 */

use super::super::list::Position;
use super::super::state_heap::Heap;
use super::super::traits::{CompletionTracker, HeapGrant};
use super::super::types::{BlockState, HeapError, HeapId, HeapResult, UnregisterStatus};
use super::records::heap_slot;
use super::BlockManager;
use crate::core::types::{checked_align_ceil, Size};
use crate::monitoring::span_operation;
use tracing::{info, warn};

impl<T: CompletionTracker> BlockManager<T> {
    /// Request a heap of `size` bytes from the provider and register it
    ///
    /// The new heap becomes the active heap and holds a single free block
    /// spanning all of it.
    pub fn register_heap(&mut self, size: Size) -> HeapResult<HeapId> {
        if size < self.config.min_block_size {
            return Err(HeapError::InvalidParameter(format!(
                "heap size {size} is below the minimum block size {}",
                self.config.min_block_size
            )));
        }

        let (count, total) = self
            .heaps()
            .fold((0, 0), |(count, total), heap| (count + 1, total + heap.total_size()));
        if count >= self.config.heap_max_count {
            return Err(HeapError::AllocationFailure(format!(
                "heap count limit reached ({count} of {})",
                self.config.heap_max_count
            )));
        }
        if total.saturating_add(size) > self.config.heap_max_total {
            return Err(HeapError::AllocationFailure(format!(
                "heap size limit reached: {total} + {size} exceeds {}",
                self.config.heap_max_total
            )));
        }

        self.reserve_records(1)?;
        let grant = self.provider.allocate(size)?;
        match self.attach_heap(grant) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.provider.release(grant);
                Err(e)
            }
        }
    }

    /// Add a heap large enough for a `min_size` request
    ///
    /// With no live heap the configured initial size is used, otherwise the
    /// configured increment; either is raised to fit the request.
    pub fn grow_heap(&mut self, min_size: Size) -> HeapResult<HeapId> {
        let base = if self.heap_head.is_none() {
            self.config.heap_initial_size
        } else {
            self.config.heap_increment
        };
        let fitted =
            checked_align_ceil(min_size, self.config.heap_granularity).unwrap_or(Size::MAX);
        let size = base.max(fitted);
        self.register_heap(size)
    }

    fn attach_heap(&mut self, grant: HeapGrant) -> HeapResult<HeapId> {
        let index = self.take_record()?;
        let id = HeapId(self.heaps.len() as u32);

        let mut heap = Heap::new(id, grant);
        heap.next = self.heap_head;
        {
            let block = self.pool.block_mut(index);
            block.offset = 0;
            block.size = grant.size;
            block.clear_data_view();
        }
        heap.adopt(&mut self.pool, index);
        self.lists[BlockState::Free.index()].attach(&mut self.pool, index, Position::Tail)?;

        if let Some(old) = self.heap_head {
            heap_slot(&mut self.heaps, old)?.prev = Some(id);
        }
        self.heaps.push(Some(heap));
        self.heap_head = Some(id);

        info!(
            heap = %id,
            size = grant.size,
            base = format_args!("0x{:x}", grant.base_address),
            "Registered state heap"
        );
        Ok(id)
    }

    /// Retire a heap
    ///
    /// Free and allocated blocks move to the deleted list at once. Submitted
    /// blocks still in flight are unpinned and flagged; the heap is released
    /// when the last of them retires.
    pub fn unregister_heap(&mut self, id: HeapId) -> HeapResult<UnregisterStatus> {
        let span = span_operation("unregister_heap");
        let chain = self.heap_ref(id)?.chain(&self.pool);

        let mut in_flight = 0;
        for index in chain {
            let (state, size, expired) = {
                let block = self.pool.block(index);
                let expired = block
                    .token
                    .as_ref()
                    .map_or(true, |token| self.tracker.is_expired(token));
                (block.state, block.size, expired)
            };

            match state {
                BlockState::Free => {
                    self.heap_mut(id)?.free -= size;
                    self.move_block(index, BlockState::Deleted, Position::Tail)?;
                }
                BlockState::Allocated => {
                    self.heap_mut(id)?.used -= size;
                    self.move_block(index, BlockState::Deleted, Position::Tail)?;
                }
                BlockState::Submitted if expired => {
                    self.heap_mut(id)?.used -= size;
                    self.move_block(index, BlockState::Deleted, Position::Tail)?;
                }
                BlockState::Submitted => {
                    let block = self.pool.block_mut(index);
                    block.is_static = false;
                    block.pending_delete = true;
                    in_flight += 1;
                }
                BlockState::Deleted | BlockState::Pool => {}
            }
        }

        let heap = self.heap_mut(id)?;
        heap.deletion_pending = true;
        heap.scratch = None;
        heap.scratch_size = 0;

        span.record_items_processed(in_flight);
        if in_flight == 0 {
            self.finalize_heap(id)?;
            span.record_result(true);
            Ok(UnregisterStatus::Released)
        } else {
            warn!(heap = %id, in_flight, "Heap release deferred until submitted blocks retire");
            span.record_result(true);
            Ok(UnregisterStatus::Pending)
        }
    }

    /// Return every record of a drained heap to the pool and release its storage
    pub(super) fn finalize_heap(&mut self, id: HeapId) -> HeapResult<()> {
        let chain = self.heap_ref(id)?.chain(&self.pool);
        for &index in &chain {
            if self.pool.block(index).state != BlockState::Deleted {
                return Err(HeapError::invalid_state(
                    "release heap",
                    self.pool.block(index).state,
                ));
            }
        }

        for index in chain {
            self.lists[BlockState::Deleted.index()].detach(&mut self.pool, index)?;
            self.recycle(index)?;
        }

        let heap = self.heaps[id.slot()].take().ok_or_else(|| super::records::unknown_heap(id))?;
        if let Some(prev) = heap.prev {
            heap_slot(&mut self.heaps, prev)?.next = heap.next;
        }
        if let Some(next) = heap.next {
            heap_slot(&mut self.heaps, next)?.prev = heap.prev;
        }
        if self.heap_head == Some(id) {
            self.heap_head = heap.next;
        }

        self.provider.release(heap.grant);
        info!(heap = %id, size = heap.total_size(), "Released state heap");
        Ok(())
    }
}
