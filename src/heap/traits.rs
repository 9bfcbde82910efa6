/*!
 * State Heap Traits
 * Seams to the GPU completion tracker and the heap backing store
 */

use super::types::HeapResult;
use crate::core::types::{GpuAddress, Size};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Source of completion tokens for submitted blocks
///
/// The allocator never waits on the GPU; it only asks whether a token has
/// retired when `refresh` runs.
pub trait CompletionTracker {
    /// Opaque, monotonically ordered epoch value
    type Token: Copy + Debug;

    /// True once the GPU has progressed past `token`
    fn is_expired(&self, token: &Self::Token) -> bool;

    /// Token to keep when a submitted block is submitted again
    fn merge(&self, _current: Self::Token, incoming: Self::Token) -> Self::Token {
        incoming
    }
}

/// Backing storage granted by a heap provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapGrant {
    /// Provider-specific identifier of the backing allocation
    pub handle: u64,
    /// Bytes actually granted (may exceed the request)
    pub size: Size,
    /// GPU virtual address of the first byte
    pub base_address: GpuAddress,
}

/// Allocates and releases the GPU-visible memory behind a heap
pub trait HeapProvider: Send {
    /// Allocate backing storage of at least `size` bytes
    fn allocate(&mut self, size: Size) -> HeapResult<HeapGrant>;

    /// Release storage previously returned by `allocate`
    fn release(&mut self, grant: HeapGrant);
}
