/*!
 * Block Record Pool
 * Batch-grown, generation-checked arena of block metadata records
 *
 * Records are created in batches and never freed individually. The block
 * manager threads unused records through its pool list; returning a record
 * there bumps its generation so outstanding handles stop resolving.
 */

use super::block::Block;
use super::types::{BlockHandle, BlockState, HeapError, HeapResult};
use std::ops::Range;

#[derive(Debug)]
struct Slot<K> {
    generation: u32,
    block: Block<K>,
}

/// Arena owning every block record of one manager
#[derive(Debug)]
pub struct MemoryPool<K> {
    slots: Vec<Slot<K>>,
    /// Index ranges created by each `allocate` call, oldest first
    batches: Vec<Range<usize>>,
    max_records: usize,
}

impl<K> MemoryPool<K> {
    pub fn new(max_records: usize) -> Self {
        Self {
            slots: Vec::new(),
            batches: Vec::new(),
            max_records,
        }
    }

    /// Create up to `count` vacant records, returning their index range
    ///
    /// The batch is truncated to the record limit; fails only if no record
    /// can be created at all.
    pub fn allocate(&mut self, count: usize) -> HeapResult<Range<usize>> {
        if count == 0 {
            return Err(HeapError::InvalidParameter(
                "block pool batch must be non-empty".into(),
            ));
        }

        let available = self.max_records.saturating_sub(self.slots.len());
        if available == 0 {
            return Err(HeapError::AllocationFailure(format!(
                "block record pool exhausted ({} records)",
                self.max_records
            )));
        }

        let count = count.min(available);
        self.slots
            .try_reserve_exact(count)
            .map_err(|e| HeapError::AllocationFailure(format!("block record pool: {e}")))?;

        let start = self.slots.len();
        self.slots.extend((start..start + count).map(|index| Slot {
            generation: 0,
            block: Block::vacant(index as u32),
        }));

        self.batches.push(start..start + count);
        Ok(start..start + count)
    }

    /// Records created so far
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub(crate) fn block(&self, index: usize) -> &Block<K> {
        &self.slots[index].block
    }

    #[inline]
    pub(crate) fn block_mut(&mut self, index: usize) -> &mut Block<K> {
        &mut self.slots[index].block
    }

    pub(crate) fn handle(&self, index: usize) -> BlockHandle {
        BlockHandle {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    /// Index behind a handle, if the record still describes the same block
    pub(crate) fn resolve(&self, handle: BlockHandle) -> Option<usize> {
        let index = handle.index as usize;
        self.slots
            .get(index)
            .filter(|slot| {
                slot.generation == handle.generation && slot.block.state != BlockState::Pool
            })
            .map(|_| index)
    }

    /// Wipe a record for reuse and invalidate handles to it
    ///
    /// The caller must already have detached it from every list.
    pub(crate) fn retire(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.block = Block::vacant(slot.block.id);
    }
}
