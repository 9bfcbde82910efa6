/*!
 * Resize and Scratch Tests
 * In-place growth, shrinking, split/merge and scratch space reservation
 */

use gpu_state_heap::{
    BlockManager, BlockManagerConfig, BlockState, FrameTracker, HeapError, HeapId,
};
use pretty_assertions::assert_eq;

fn setup(granularity: usize, heap_size: usize) -> (BlockManager, HeapId) {
    let config = BlockManagerConfig::default()
        .with_granularity(granularity)
        .with_min_block_size(granularity);
    let mut manager = BlockManager::new(config, FrameTracker::new()).unwrap();
    let heap = manager.register_heap(heap_size).unwrap();
    (manager, heap)
}

fn layout(manager: &BlockManager, heap: HeapId) -> Vec<(usize, usize, BlockState)> {
    manager
        .heap_blocks(heap)
        .unwrap()
        .into_iter()
        .map(|h| {
            let block = manager.block(h).unwrap();
            (block.offset(), block.size(), block.state())
        })
        .collect()
}

#[test]
fn test_grow_into_following_free_space() {
    let (mut manager, heap) = setup(64, 4096);
    let block = manager.allocate_block(128, 1, None).unwrap();

    manager.resize_block(block, 512, 1, false).unwrap();
    assert_eq!(
        layout(&manager, heap),
        vec![(0, 512, BlockState::Allocated), (512, 3584, BlockState::Free)]
    );
    assert_eq!(manager.block(block).unwrap().data_size(), 512);
    assert_eq!(manager.heap(heap).unwrap().used_bytes(), 512);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_grow_backward_only_when_allowed() {
    let (mut manager, heap) = setup(64, 4096);
    let a = manager.allocate_block(128, 1, None).unwrap();
    let b = manager.allocate_block(128, 1, None).unwrap();
    let _c = manager.allocate_block(3840, 1, None).unwrap();
    manager.free_block(a).unwrap();
    let before = layout(&manager, heap);

    let err = manager.resize_block(b, 256, 1, false).unwrap_err();
    assert!(err.is_no_space());
    assert_eq!(layout(&manager, heap), before);

    manager.resize_block(b, 256, 1, true).unwrap();
    let block = manager.block(b).unwrap();
    assert_eq!((block.offset(), block.size()), (0, 256));
    assert_eq!(manager.list(BlockState::Free).len(), 0);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_shrink_returns_excess() {
    let (mut manager, heap) = setup(64, 4096);
    let block = manager.allocate_block(1024, 1, None).unwrap();

    manager.resize_block(block, 256, 1, false).unwrap();
    assert_eq!(
        layout(&manager, heap),
        vec![(0, 256, BlockState::Allocated), (256, 3840, BlockState::Free)]
    );
    assert_eq!(manager.heap(heap).unwrap().free_bytes(), 3840);
}

#[test]
fn test_resize_grows_padded_block_to_requested_data() {
    let (mut manager, heap) = setup(64, 4096);
    let _pad = manager.allocate_block(64, 1, None).unwrap();
    let block = manager.allocate_block(100, 256, None).unwrap();
    assert_eq!(manager.block(block).unwrap().data_size(), 128);

    manager.resize_block(block, 300, 256, false).unwrap();
    let resized = manager.block(block).unwrap();
    assert!(resized.data_size() >= 300);
    assert_eq!(resized.data_offset(), 256);
    assert_eq!(
        layout(&manager, heap),
        vec![
            (0, 64, BlockState::Allocated),
            (64, 512, BlockState::Allocated),
            (576, 3520, BlockState::Free),
        ]
    );
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_resize_rejects_submitted_block() {
    let (mut manager, _) = setup(64, 4096);
    let tracker = manager.tracker().clone();
    let block = manager.allocate_block(128, 1, None).unwrap();
    manager.submit_block(block, tracker.issue()).unwrap();

    assert_eq!(
        manager.resize_block(block, 512, 1, true),
        Err(HeapError::InvalidState {
            operation: "resize".into(),
            state: BlockState::Submitted,
        })
    );
    assert!(matches!(
        manager.resize_block(block, 0, 1, true),
        Err(HeapError::InvalidParameter(_))
    ));
}

#[test]
fn test_split_then_merge_back() {
    let (mut manager, heap) = setup(64, 4096);
    let block = manager.allocate_block(1024, 1, None).unwrap();

    let rest = manager.split_block(block, 256, 1, false).unwrap();
    assert_eq!(manager.block(rest).unwrap().state(), BlockState::Allocated);
    assert_eq!(manager.block(rest).unwrap().offset(), 256);

    manager.free_block(rest).unwrap();
    assert_eq!(
        layout(&manager, heap),
        vec![(0, 256, BlockState::Allocated), (256, 3840, BlockState::Free)]
    );

    let merged = manager.merge_blocks(block, rest, 1, true).unwrap();
    assert_eq!(merged, block);
    assert_eq!(layout(&manager, heap), vec![(0, 4096, BlockState::Allocated)]);
    assert!(manager.block(rest).is_none());
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_scratch_grows_toward_heap_start() {
    let (mut manager, heap) = setup(256, 16 * 1024);

    let first = manager.allocate_with_scratch(512, 16, 2048).unwrap();
    let scratch = manager.scratch_block(heap).unwrap();
    assert_eq!(manager.block(scratch).unwrap().offset(), 13312);
    assert_eq!(manager.block(first).unwrap().offset(), 0);

    let second = manager.allocate_with_scratch(512, 16, 4096).unwrap();
    assert_eq!(manager.scratch_block(heap), Some(scratch));
    let block = manager.block(scratch).unwrap();
    assert_eq!((block.offset(), block.end()), (12288, 16 * 1024));
    assert!(block.is_static());
    assert_eq!(manager.heap(heap).unwrap().scratch_size(), 4096);
    assert_eq!(manager.block(second).unwrap().offset(), 512);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_scratch_skips_heap_too_small() {
    let config = BlockManagerConfig::default()
        .with_granularity(256)
        .with_min_block_size(256);
    let mut manager = BlockManager::new(config, FrameTracker::new()).unwrap();
    let large = manager.register_heap(16 * 1024).unwrap();
    let small = manager.register_heap(2048).unwrap();

    let block = manager.allocate_with_scratch(512, 16, 2048).unwrap();
    assert_eq!(manager.block(block).unwrap().heap(), Some(large));
    assert!(manager.scratch_block(large).is_some());
    assert_eq!(manager.scratch_block(small), None);
    assert_eq!(manager.heap(small).unwrap().used_bytes(), 0);
}

#[test]
fn test_freeing_scratch_clears_reservation() {
    let (mut manager, heap) = setup(256, 16 * 1024);
    manager.allocate_with_scratch(512, 16, 2048).unwrap();
    let scratch = manager.scratch_block(heap).unwrap();

    manager.free_block(scratch).unwrap();
    assert_eq!(manager.scratch_block(heap), None);
    assert_eq!(manager.heap(heap).unwrap().scratch_size(), 0);
    assert!(manager.check_invariants().is_ok());
}
