/*!
 * Block Allocation Tests
 * Single block allocation, alignment, release and heap growth
 */

use gpu_state_heap::{
    BlockManager, BlockManagerConfig, BlockState, FrameTracker, HeapAffinity, HeapError,
    HeapPressure, VirtualHeapProvider,
};
use pretty_assertions::assert_eq;

fn byte_manager(granularity: usize) -> BlockManager {
    let config = BlockManagerConfig::default()
        .with_granularity(granularity)
        .with_min_block_size(granularity);
    BlockManager::new(config, FrameTracker::new()).unwrap()
}

#[test]
fn test_allocate_and_free_restores_heap() {
    let mut manager = BlockManager::new(BlockManagerConfig::default(), FrameTracker::new()).unwrap();
    let heap = manager.register_heap(1024 * 1024).unwrap();

    let block = manager.allocate_block(100, 16, None).unwrap();
    let info = manager.block(block).unwrap();
    assert_eq!(info.state(), BlockState::Allocated);
    assert_eq!(info.offset(), 0);
    assert_eq!(info.size(), 2048);
    assert!(info.data_size() >= 100);
    assert_eq!(info.data_offset() % 16, 0);

    let stats = manager.stats();
    assert_eq!(stats.used_bytes, 2048);
    assert_eq!(stats.free_bytes, 1024 * 1024 - 2048);

    manager.free_block(block).unwrap();
    let stats = manager.stats();
    assert_eq!(stats.used_bytes, 0);
    assert_eq!(stats.free.count, 1);
    assert_eq!(stats.free.bytes, 1024 * 1024);
    assert_eq!(manager.heap(heap).unwrap().free_bytes(), 1024 * 1024);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_exhausted_heap_reports_no_space() {
    let mut manager = byte_manager(8);
    manager.register_heap(1000).unwrap();

    let whole = manager.allocate_block(1000, 1, None).unwrap();
    assert_eq!(manager.block(whole).unwrap().size(), 1000);

    let err = manager.allocate_block(1, 1, None).unwrap_err();
    assert_eq!(
        err,
        HeapError::NoSpace {
            requested: 1,
            largest_free: 0
        }
    );
    assert!(err.is_no_space());
    assert_eq!(manager.stats().pressure(), HeapPressure::Critical);
}

#[test]
fn test_first_fit_reuses_freed_hole() {
    let mut manager = byte_manager(64);
    manager.register_heap(1024).unwrap();

    let a = manager.allocate_block(128, 1, None).unwrap();
    let b = manager.allocate_block(128, 1, None).unwrap();
    let _c = manager.allocate_block(768, 1, None).unwrap();
    assert_eq!(manager.block(b).unwrap().offset(), 128);
    assert_eq!(manager.list(BlockState::Free).len(), 0);

    manager.free_block(b).unwrap();
    let d = manager.allocate_block(64, 1, None).unwrap();
    assert_eq!(manager.block(d).unwrap().offset(), 128);
    assert_eq!(manager.block(d).unwrap().size(), 64);
    assert_eq!(manager.block(a).unwrap().offset(), 0);
    assert_eq!(manager.list(BlockState::Free).size(), 64);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_stale_handle_is_rejected() {
    let mut manager = byte_manager(64);
    manager.register_heap(1024).unwrap();

    let a = manager.allocate_block(64, 1, None).unwrap();
    let b = manager.allocate_block(64, 1, None).unwrap();
    manager.free_block(a).unwrap();
    // Freeing b absorbs a's record, which goes back to the pool
    manager.free_block(b).unwrap();
    assert!(manager.block(a).is_none());
    assert_eq!(manager.list(BlockState::Free).len(), 1);

    let _reused = manager.allocate_block(64, 1, None).unwrap();
    assert!(matches!(
        manager.free_block(a),
        Err(HeapError::InvalidParameter(_))
    ));
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_zero_size_allocation_rejected() {
    let mut manager = byte_manager(64);
    manager.register_heap(1024).unwrap();
    assert!(matches!(
        manager.allocate_block(0, 1, None),
        Err(HeapError::InvalidParameter(_))
    ));
}

#[test]
fn test_oversized_requests_fail_cleanly() {
    let mut manager = byte_manager(64);
    manager.register_heap(4096).unwrap();

    assert!(manager
        .allocate_block(usize::MAX - 8, 4096, None)
        .unwrap_err()
        .is_no_space());
    assert!(matches!(
        manager.allocate_multiple(&[usize::MAX, 1], 1, HeapAffinity::Any),
        Err(HeapError::InvalidParameter(_))
    ));
    assert!(manager
        .allocate_with_scratch(usize::MAX - 16, 4096, 1024)
        .unwrap_err()
        .is_no_space());
    assert_eq!(manager.stats().used_bytes, 0);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_heap_affinity_restricts_search() {
    let mut manager = byte_manager(64);
    let first = manager.register_heap(1024).unwrap();
    let second = manager.register_heap(1024).unwrap();
    assert_eq!(manager.active_heap(), Some(second));

    let block = manager.allocate_block(64, 1, Some(first)).unwrap();
    assert_eq!(manager.block(block).unwrap().heap(), Some(first));

    let unaffined = manager.allocate_block(64, 1, None).unwrap();
    assert_eq!(manager.block(unaffined).unwrap().heap(), Some(second));
}

#[test]
fn test_grow_heap_after_no_space() {
    let provider = VirtualHeapProvider::new();
    let config = BlockManagerConfig::default()
        .with_granularity(256)
        .with_min_block_size(256)
        .with_heap_sizes(4096, 4096);
    let mut manager = BlockManager::new(config, FrameTracker::new())
        .unwrap()
        .with_provider(provider.clone());

    assert!(manager.allocate_block(256, 1, None).unwrap_err().is_no_space());
    let heap = manager.grow_heap(256).unwrap();
    assert_eq!(manager.heap(heap).unwrap().total_size(), 4096);

    let block = manager.allocate_block(256, 1, None).unwrap();
    assert_eq!(manager.block(block).unwrap().heap(), Some(heap));
    assert_eq!(provider.live_grants(), 1);
    assert_eq!(provider.live_bytes(), 4096);
}

#[test]
fn test_gpu_address_includes_alignment_padding() {
    let mut manager = byte_manager(64);
    let heap = manager.register_heap(4096).unwrap();
    let base = manager.heap(heap).unwrap().base_address();

    let _pad = manager.allocate_block(64, 1, None).unwrap();
    let aligned = manager.allocate_block(256, 256, None).unwrap();
    let block = manager.block(aligned).unwrap();
    assert_eq!(block.offset(), 64);
    assert_eq!(block.data_offset(), 256);
    assert_eq!(block.alignment_padding(), 192);
    assert_eq!(manager.gpu_address(aligned).unwrap(), base + 256);
}

#[test]
fn test_provider_failure_surfaces_as_allocation_failure() {
    let config = BlockManagerConfig::default()
        .with_granularity(64)
        .with_min_block_size(64);
    let mut manager = BlockManager::new(config, FrameTracker::new())
        .unwrap()
        .with_provider(VirtualHeapProvider::with_capacity(1024));

    manager.register_heap(1024).unwrap();
    assert!(matches!(
        manager.register_heap(1024),
        Err(HeapError::AllocationFailure(_))
    ));
    assert_eq!(manager.heaps().count(), 1);
}
