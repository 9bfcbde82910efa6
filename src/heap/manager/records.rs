/*!
 * Record Plumbing
 * Pool list maintenance, list moves and handle resolution
 */

use super::super::list::Position;
use super::super::state_heap::Heap;
use super::super::traits::CompletionTracker;
use super::super::types::{BlockHandle, BlockState, HeapError, HeapId, HeapResult};
use super::{stale_handle, BlockManager};
use tracing::trace;

impl<T: CompletionTracker> BlockManager<T> {
    /// Create `count` records and thread them onto the pool list
    pub(super) fn extend_pool(&mut self, count: usize) -> HeapResult<()> {
        let range = self.pool.allocate(count)?;
        let created = range.len();
        let list = &mut self.lists[BlockState::Pool.index()];
        for index in range {
            list.attach(&mut self.pool, index, Position::Tail)?;
        }
        trace!(created, total = self.pool.len(), "Extended block record pool");
        Ok(())
    }

    /// Make sure at least `count` spare records wait on the pool list
    pub(super) fn reserve_records(&mut self, count: usize) -> HeapResult<()> {
        let spare = self.lists[BlockState::Pool.index()].len();
        if spare < count {
            self.extend_pool((count - spare).max(self.config.pool_increment))?;
        }
        if self.lists[BlockState::Pool.index()].len() < count {
            return Err(HeapError::AllocationFailure(format!(
                "block record pool cannot supply {count} records ({} max)",
                self.pool.max_records()
            )));
        }
        Ok(())
    }

    /// Detach a spare record from the pool list
    pub(super) fn take_record(&mut self) -> HeapResult<usize> {
        self.reserve_records(1)?;
        self.lists[BlockState::Pool.index()]
            .pop_front(&mut self.pool)
            .ok_or_else(|| HeapError::AllocationFailure("block record pool is empty".into()))
    }

    /// Return a detached, unchained record to the pool list
    pub(super) fn recycle(&mut self, index: usize) -> HeapResult<()> {
        self.pool.retire(index);
        self.lists[BlockState::Pool.index()].attach(&mut self.pool, index, Position::Tail)
    }

    /// Move a listed block onto another state list
    pub(super) fn move_block(
        &mut self,
        index: usize,
        to: BlockState,
        position: Position,
    ) -> HeapResult<()> {
        let from = self.pool.block(index).state;
        self.lists[from.index()].detach(&mut self.pool, index)?;
        self.lists[to.index()].attach(&mut self.pool, index, position)
    }

    pub(super) fn resolve(&self, handle: BlockHandle) -> HeapResult<usize> {
        self.pool.resolve(handle).ok_or_else(|| stale_handle(handle))
    }

    pub(super) fn heap_of(&self, index: usize) -> HeapResult<HeapId> {
        let block = self.pool.block(index);
        block.heap.ok_or_else(|| {
            HeapError::InvalidParameter(format!("block record {} has no heap", block.id))
        })
    }

    pub(super) fn heap_ref(&self, id: HeapId) -> HeapResult<&Heap> {
        self.heap(id).ok_or_else(|| unknown_heap(id))
    }

    pub(super) fn heap_mut(&mut self, id: HeapId) -> HeapResult<&mut Heap> {
        heap_slot(&mut self.heaps, id)
    }

    /// Registered heap ids, most recent first
    pub(super) fn heap_ids(&self) -> Vec<HeapId> {
        self.heaps().map(Heap::id).collect()
    }
}

/// Heap lookup that borrows only the heap table
pub(super) fn heap_slot(heaps: &mut [Option<Heap>], id: HeapId) -> HeapResult<&mut Heap> {
    heaps
        .get_mut(id.slot())
        .and_then(Option::as_mut)
        .ok_or_else(|| unknown_heap(id))
}

pub(super) fn unknown_heap(id: HeapId) -> HeapError {
    HeapError::InvalidParameter(format!("{id} is not registered"))
}
