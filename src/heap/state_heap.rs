/*!
 * State Heaps
 * One backing memory segment and the address-ordered chain of its blocks
 */

use super::pool::MemoryPool;
use super::traits::HeapGrant;
use super::types::HeapId;
use crate::core::types::{GpuAddress, Size};

/// One registered backing memory segment
#[derive(Debug, Clone)]
pub struct Heap {
    pub(crate) id: HeapId,
    pub(crate) grant: HeapGrant,
    pub(crate) used: Size,
    pub(crate) free: Size,
    pub(crate) deletion_pending: bool,
    /// First and last block of the adjacency chain
    pub(crate) first: Option<usize>,
    pub(crate) last: Option<usize>,
    pub(crate) scratch: Option<usize>,
    pub(crate) scratch_size: Size,
    /// Neighbours in the manager's heap chain
    pub(crate) prev: Option<HeapId>,
    pub(crate) next: Option<HeapId>,
}

impl Heap {
    pub(crate) fn new(id: HeapId, grant: HeapGrant) -> Self {
        Self {
            id,
            grant,
            used: 0,
            free: grant.size,
            deletion_pending: false,
            first: None,
            last: None,
            scratch: None,
            scratch_size: 0,
            prev: None,
            next: None,
        }
    }

    pub fn id(&self) -> HeapId {
        self.id
    }

    pub fn total_size(&self) -> Size {
        self.grant.size
    }

    pub fn used_bytes(&self) -> Size {
        self.used
    }

    pub fn free_bytes(&self) -> Size {
        self.free
    }

    pub fn base_address(&self) -> GpuAddress {
        self.grant.base_address
    }

    pub fn grant(&self) -> HeapGrant {
        self.grant
    }

    pub fn is_deletion_pending(&self) -> bool {
        self.deletion_pending
    }

    /// Usable bytes of the current scratch reservation
    pub fn scratch_size(&self) -> Size {
        self.scratch_size
    }

    pub fn next_heap(&self) -> Option<HeapId> {
        self.next
    }

    pub fn prev_heap(&self) -> Option<HeapId> {
        self.prev
    }

    /// Make `index` the only block of the chain
    pub(crate) fn adopt<K>(&mut self, pool: &mut MemoryPool<K>, index: usize) {
        let block = pool.block_mut(index);
        block.adjacency.prev = None;
        block.adjacency.next = None;
        block.heap = Some(self.id);
        self.first = Some(index);
        self.last = Some(index);
    }

    /// Link `index` directly after `anchor` in address order
    pub(crate) fn link_after<K>(&mut self, pool: &mut MemoryPool<K>, anchor: usize, index: usize) {
        let next = pool.block(anchor).adjacency.next;
        {
            let block = pool.block_mut(index);
            block.adjacency.prev = Some(anchor);
            block.adjacency.next = next;
        }
        pool.block_mut(anchor).adjacency.next = Some(index);
        match next {
            Some(n) => pool.block_mut(n).adjacency.prev = Some(index),
            None => self.last = Some(index),
        }
    }

    /// Link `index` directly before `anchor` in address order
    pub(crate) fn link_before<K>(&mut self, pool: &mut MemoryPool<K>, anchor: usize, index: usize) {
        let prev = pool.block(anchor).adjacency.prev;
        {
            let block = pool.block_mut(index);
            block.adjacency.prev = prev;
            block.adjacency.next = Some(anchor);
        }
        pool.block_mut(anchor).adjacency.prev = Some(index);
        match prev {
            Some(p) => pool.block_mut(p).adjacency.next = Some(index),
            None => self.first = Some(index),
        }
    }

    /// Remove `index` from the chain; its neighbours become adjacent
    pub(crate) fn unlink<K>(&mut self, pool: &mut MemoryPool<K>, index: usize) {
        let links = pool.block(index).adjacency;
        match links.prev {
            Some(p) => pool.block_mut(p).adjacency.next = links.next,
            None => self.first = links.next,
        }
        match links.next {
            Some(n) => pool.block_mut(n).adjacency.prev = links.prev,
            None => self.last = links.prev,
        }
        let block = pool.block_mut(index);
        block.adjacency.prev = None;
        block.adjacency.next = None;
    }

    /// Block indices in address order
    pub(crate) fn chain<K>(&self, pool: &MemoryPool<K>) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.first;
        while let Some(index) = cursor {
            out.push(index);
            cursor = pool.block(index).adjacency.next;
        }
        out
    }
}
