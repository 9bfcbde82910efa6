/*!
 * Block Lists
 * Index-linked doubly linked lists of blocks sharing one lifecycle state
 */

use super::pool::MemoryPool;
use super::types::{BlockState, HeapError, HeapResult};
use crate::core::types::Size;

/// List of every block in one state, with aggregate count and size
///
/// Links live inside the block records; the list only holds head, tail and
/// totals. All operations are O(1) except iteration.
#[derive(Debug, Clone)]
pub struct BlockList {
    state: BlockState,
    head: Option<usize>,
    tail: Option<usize>,
    count: usize,
    size: Size,
}

/// Where to attach a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Head,
    Tail,
    After(usize),
    Before(usize),
}

impl BlockList {
    pub fn new(state: BlockState) -> Self {
        Self {
            state,
            head: None,
            tail: None,
            count: 0,
            size: 0,
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sum of the sizes of all blocks on the list
    pub fn size(&self) -> Size {
        self.size
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Attach a detached block, taking over its state
    pub(crate) fn attach<K>(
        &mut self,
        pool: &mut MemoryPool<K>,
        index: usize,
        position: Position,
    ) -> HeapResult<()> {
        if pool.block(index).listed {
            return Err(HeapError::InvalidParameter(format!(
                "block record {} is still attached to the {} list",
                pool.block(index).id,
                pool.block(index).state
            )));
        }

        let (prev, next) = match position {
            Position::Tail => (self.tail, None),
            Position::Head => (None, self.head),
            Position::After(anchor) => {
                self.check_member(pool, anchor)?;
                (Some(anchor), pool.block(anchor).list.next)
            }
            Position::Before(anchor) => {
                self.check_member(pool, anchor)?;
                (pool.block(anchor).list.prev, Some(anchor))
            }
        };

        match prev {
            Some(p) => pool.block_mut(p).list.next = Some(index),
            None => self.head = Some(index),
        }
        match next {
            Some(n) => pool.block_mut(n).list.prev = Some(index),
            None => self.tail = Some(index),
        }

        let block = pool.block_mut(index);
        block.list.prev = prev;
        block.list.next = next;
        block.listed = true;
        block.state = self.state;

        self.count += 1;
        self.size += block.size;
        Ok(())
    }

    /// Detach a block that belongs to this list
    pub(crate) fn detach<K>(&mut self, pool: &mut MemoryPool<K>, index: usize) -> HeapResult<()> {
        self.check_member(pool, index)?;

        let links = pool.block(index).list;
        match links.prev {
            Some(p) => pool.block_mut(p).list.next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(n) => pool.block_mut(n).list.prev = links.prev,
            None => self.tail = links.prev,
        }

        let block = pool.block_mut(index);
        block.list.prev = None;
        block.list.next = None;
        block.listed = false;

        self.count -= 1;
        self.size -= block.size;
        Ok(())
    }

    /// Detach and return the first block
    pub(crate) fn pop_front<K>(&mut self, pool: &mut MemoryPool<K>) -> Option<usize> {
        let head = self.head?;
        self.detach(pool, head).ok()?;
        Some(head)
    }

    /// Track a size change of a block that stays on the list
    pub(crate) fn grow(&mut self, bytes: Size) {
        self.size += bytes;
    }

    pub(crate) fn shrink(&mut self, bytes: Size) {
        self.size -= bytes;
    }

    /// Indices from head to tail
    pub(crate) fn indices<K>(&self, pool: &MemoryPool<K>) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count);
        let mut cursor = self.head;
        while let Some(index) = cursor {
            out.push(index);
            cursor = pool.block(index).list.next;
        }
        out
    }

    fn check_member<K>(&self, pool: &MemoryPool<K>, index: usize) -> HeapResult<()> {
        let block = pool.block(index);
        if !block.listed || block.state != self.state {
            return Err(HeapError::InvalidParameter(format!(
                "block record {} ({}) is not on the {} list",
                block.id, block.state, self.state
            )));
        }
        Ok(())
    }
}
