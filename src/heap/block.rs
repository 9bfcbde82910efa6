/*!
 * Block Records
 * Metadata describing one contiguous byte range of a heap
 */

use super::types::{BlockState, HeapId};
use crate::core::types::{align_ceil, Offset, Size};

/// Index-based link pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Links {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// One addressable sub-range of a heap
///
/// A block sits on exactly one state list (`list` links) and, unless it is a
/// pool record, on its heap's address-ordered adjacency chain (`adjacency`
/// links).
#[derive(Debug, Clone)]
pub struct Block<K> {
    pub(crate) id: u32,
    pub(crate) state: BlockState,
    pub(crate) heap: Option<HeapId>,
    pub(crate) offset: Offset,
    pub(crate) size: Size,
    pub(crate) data_offset: Offset,
    pub(crate) data_size: Size,
    pub(crate) padding: Size,
    pub(crate) token: Option<K>,
    pub(crate) is_static: bool,
    pub(crate) pending_delete: bool,
    pub(crate) listed: bool,
    pub(crate) list: Links,
    pub(crate) adjacency: Links,
}

impl<K> Block<K> {
    pub(crate) fn vacant(id: u32) -> Self {
        Self {
            id,
            state: BlockState::Pool,
            heap: None,
            offset: 0,
            size: 0,
            data_offset: 0,
            data_size: 0,
            padding: 0,
            token: None,
            is_static: false,
            pending_delete: false,
            listed: false,
            list: Links::default(),
            adjacency: Links::default(),
        }
    }

    /// Stable record id, preserved across recycling
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn heap(&self) -> Option<HeapId> {
        self.heap
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// First offset past the block
    pub fn end(&self) -> Offset {
        self.offset + self.size
    }

    /// Aligned offset of the usable data
    pub fn data_offset(&self) -> Offset {
        self.data_offset
    }

    /// Usable bytes after alignment padding
    pub fn data_size(&self) -> Size {
        self.data_size
    }

    pub fn alignment_padding(&self) -> Size {
        self.padding
    }

    pub fn token(&self) -> Option<&K> {
        self.token.as_ref()
    }

    /// Pinned: refresh returns it to the allocated list instead of freeing it
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete
    }

    /// Recompute the aligned data view of the block
    pub(crate) fn set_data_view(&mut self, alignment: Size) {
        self.data_offset = align_ceil(self.offset, alignment);
        self.padding = self.data_offset - self.offset;
        self.data_size = self.size.saturating_sub(self.padding);
    }

    pub(crate) fn clear_data_view(&mut self) {
        self.data_offset = self.offset;
        self.padding = 0;
        self.data_size = self.size;
    }
}

impl<K: Copy> Block<K> {
    /// Copy of this block's range and flags for a freshly drawn record
    pub(crate) fn fragment(&self, id: u32) -> Self {
        Self {
            id,
            listed: false,
            list: Links::default(),
            adjacency: Links::default(),
            ..self.clone()
        }
    }
}
