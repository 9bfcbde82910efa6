/*!
 * Virtual Heap Provider
 * Simulated GPU address space handing out heap backing ranges
 */

use super::traits::{HeapGrant, HeapProvider};
use super::types::{HeapError, HeapResult};
use crate::core::types::{checked_align_ceil, GpuAddress, Size};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Alignment of every simulated heap base address (64KB)
const HEAP_BASE_ALIGN: Size = 64 * 1024;

/// First simulated GPU virtual address
const HEAP_BASE_ADDRESS: GpuAddress = 0x1_0000_0000;

#[derive(Debug, Default)]
struct ProviderState {
    next_handle: u64,
    next_address: GpuAddress,
    live: HashMap<u64, HeapGrant>,
    released: usize,
}

/// Heap provider that simulates GPU memory by carving address ranges
///
/// Clones share state, so a test can hand one clone to the manager and keep
/// another to observe grants and releases.
#[derive(Debug, Clone)]
pub struct VirtualHeapProvider {
    state: Arc<Mutex<ProviderState>>,
    capacity: Option<Size>,
}

impl VirtualHeapProvider {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProviderState {
                next_address: HEAP_BASE_ADDRESS,
                ..Default::default()
            })),
            capacity: None,
        }
    }

    /// Provider that fails once `capacity` live bytes are granted
    pub fn with_capacity(capacity: Size) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Grants not yet released
    pub fn live_grants(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Bytes currently granted
    pub fn live_bytes(&self) -> Size {
        self.state.lock().live.values().map(|g| g.size).sum()
    }

    /// Grants released so far
    pub fn released_grants(&self) -> usize {
        self.state.lock().released
    }
}

impl Default for VirtualHeapProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapProvider for VirtualHeapProvider {
    fn allocate(&mut self, size: Size) -> HeapResult<HeapGrant> {
        if size == 0 {
            return Err(HeapError::InvalidParameter("heap size must be non-zero".into()));
        }

        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            let live: Size = state.live.values().map(|g| g.size).sum();
            if live.saturating_add(size) > capacity {
                return Err(HeapError::AllocationFailure(format!(
                    "virtual heap provider exhausted: requested {size} bytes, {} of {capacity} in use",
                    live
                )));
            }
        }

        let next_address = checked_align_ceil(size, HEAP_BASE_ALIGN)
            .and_then(|span| state.next_address.checked_add(span as GpuAddress))
            .ok_or_else(|| {
                HeapError::AllocationFailure(format!(
                    "virtual address space exhausted: requested {size} bytes"
                ))
            })?;

        state.next_handle += 1;
        let grant = HeapGrant {
            handle: state.next_handle,
            size,
            base_address: state.next_address,
        };
        state.next_address = next_address;
        state.live.insert(grant.handle, grant);

        debug!(
            handle = grant.handle,
            size,
            base = format_args!("0x{:x}", grant.base_address),
            "Granted virtual heap"
        );
        Ok(grant)
    }

    fn release(&mut self, grant: HeapGrant) {
        let mut state = self.state.lock();
        if state.live.remove(&grant.handle).is_some() {
            state.released += 1;
            debug!(handle = grant.handle, size = grant.size, "Released virtual heap");
        }
    }
}
