/*!
 * Block Lifecycle Tests
 * Submission, deferred reclamation, pinning and heap retirement
 */

use gpu_state_heap::{
    BlockManager, BlockManagerConfig, BlockState, CompletionTracker, FrameTracker, HeapError,
    RefreshSummary, UnregisterStatus, VirtualHeapProvider,
};
use pretty_assertions::assert_eq;
use serial_test::serial;

fn setup(heap_size: usize) -> (BlockManager, FrameTracker, VirtualHeapProvider) {
    let tracker = FrameTracker::new();
    let provider = VirtualHeapProvider::new();
    let config = BlockManagerConfig::default()
        .with_granularity(64)
        .with_min_block_size(64);
    let mut manager = BlockManager::new(config, tracker.clone())
        .unwrap()
        .with_provider(provider.clone());
    manager.register_heap(heap_size).unwrap();
    (manager, tracker, provider)
}

#[test]
fn test_refresh_waits_for_completion() {
    let (mut manager, tracker, _) = setup(4096);

    let block = manager.allocate_block(256, 1, None).unwrap();
    let frame = tracker.issue();
    manager.submit_block(block, frame).unwrap();

    let summary = manager.refresh();
    assert_eq!(summary.in_flight, 1);
    assert!(summary.is_idle());
    assert_eq!(manager.block(block).unwrap().state(), BlockState::Submitted);

    tracker.complete_through(frame);
    let summary = manager.refresh();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.in_flight, 0);
    assert_eq!(manager.stats().used_bytes, 0);
    assert_eq!(manager.list(BlockState::Free).len(), 1);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_refresh_scans_out_of_order_tokens() {
    let (mut manager, tracker, _) = setup(4096);

    let late = manager.allocate_block(64, 1, None).unwrap();
    let early = manager.allocate_block(64, 1, None).unwrap();
    let first = tracker.issue();
    let second = tracker.issue();

    // Submitted in reverse token order
    manager.submit_block(late, second).unwrap();
    manager.submit_block(early, first).unwrap();

    tracker.complete_through(first);
    let summary = manager.refresh();
    assert_eq!(summary.reclaimed, 1);
    assert_eq!(summary.in_flight, 1);
    assert_eq!(manager.blocks_in(BlockState::Submitted), vec![late]);
}

#[test]
fn test_static_block_returns_to_allocated() {
    let (mut manager, tracker, _) = setup(4096);

    let pinned = manager.allocate_block(128, 1, None).unwrap();
    let transient = manager.allocate_block(128, 1, None).unwrap();
    manager.set_static(pinned, true).unwrap();

    let frame = tracker.issue();
    manager.submit_block(pinned, frame).unwrap();
    manager.submit_block(transient, frame).unwrap();
    tracker.complete_through(frame);

    let summary = manager.refresh();
    assert_eq!(
        summary,
        RefreshSummary {
            reclaimed: 1,
            revalidated: 1,
            ..Default::default()
        }
    );

    let block = manager.block(pinned).unwrap();
    assert_eq!(block.state(), BlockState::Allocated);
    assert!(block.is_static());
    assert!(block.token().is_none());
    assert_eq!(manager.block(transient).unwrap().state(), BlockState::Free);

    // A revalidated block can be submitted again
    let next = tracker.issue();
    manager.submit_block(pinned, next).unwrap();
    assert_eq!(manager.list(BlockState::Submitted).len(), 1);
}

#[test]
fn test_refresh_is_idempotent() {
    let (mut manager, tracker, _) = setup(4096);

    for _ in 0..4 {
        let block = manager.allocate_block(128, 1, None).unwrap();
        manager.submit_block(block, tracker.issue()).unwrap();
    }
    tracker.complete_all();

    let first = manager.refresh();
    assert_eq!(first.reclaimed, 4);
    let stats = manager.stats();

    let second = manager.refresh();
    assert!(second.is_idle());
    assert_eq!(second.in_flight, 0);
    let again = manager.stats();
    assert_eq!(again.free, stats.free);
    assert_eq!(again.used_bytes, stats.used_bytes);
    assert_eq!(again.pool, stats.pool);
}

#[test]
fn test_free_of_in_flight_block_is_deferred() {
    let (mut manager, tracker, _) = setup(4096);

    let block = manager.allocate_block(128, 1, None).unwrap();
    manager.set_static(block, true).unwrap();
    let frame = tracker.issue();
    manager.submit_block(block, frame).unwrap();

    manager.free_block(block).unwrap();
    let info = manager.block(block).unwrap();
    assert_eq!(info.state(), BlockState::Submitted);
    assert!(!info.is_static());

    tracker.complete_through(frame);
    assert_eq!(manager.refresh().reclaimed, 1);
    assert_eq!(manager.stats().used_bytes, 0);
}

#[test]
fn test_free_and_pin_reject_wrong_states() {
    let (mut manager, _, _) = setup(4096);

    let block = manager.allocate_block(128, 1, None).unwrap();
    let rest = manager.blocks_in(BlockState::Free)[0];

    assert_eq!(
        manager.free_block(rest),
        Err(HeapError::InvalidState {
            operation: "free".into(),
            state: BlockState::Free,
        })
    );
    assert!(matches!(
        manager.set_static(rest, true),
        Err(HeapError::InvalidState { .. })
    ));
    assert!(matches!(
        manager.submit_block(rest, FrameTracker::new().issue()),
        Err(HeapError::InvalidState { .. })
    ));
    assert!(manager.set_static(block, true).is_ok());
}

#[test]
fn test_unregister_idle_heap_releases_storage() {
    let (mut manager, _, provider) = setup(4096);
    let heap = manager.active_heap().unwrap();
    let _block = manager.allocate_block(128, 1, None).unwrap();

    assert_eq!(manager.unregister_heap(heap).unwrap(), UnregisterStatus::Released);
    assert!(manager.heap(heap).is_none());
    assert_eq!(manager.heaps().count(), 0);
    assert_eq!(provider.live_grants(), 0);
    assert_eq!(provider.released_grants(), 1);
    assert_eq!(manager.list(BlockState::Allocated).len(), 0);
    assert_eq!(manager.list(BlockState::Deleted).len(), 0);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_unregister_defers_until_blocks_retire() {
    let (mut manager, tracker, provider) = setup(4096);
    let heap = manager.active_heap().unwrap();

    let a = manager.allocate_block(128, 1, None).unwrap();
    let b = manager.allocate_block(128, 1, None).unwrap();
    let first = tracker.issue();
    let second = tracker.issue();
    manager.submit_block(a, first).unwrap();
    manager.submit_block(b, second).unwrap();

    assert_eq!(manager.unregister_heap(heap).unwrap(), UnregisterStatus::Pending);
    assert!(manager.heap(heap).unwrap().is_deletion_pending());
    assert!(manager.block(a).unwrap().is_pending_delete());
    // Nothing new lands on a heap pending deletion
    assert!(manager.allocate_block(64, 1, None).unwrap_err().is_no_space());

    tracker.complete_through(first);
    let summary = manager.refresh();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.heaps_released, 0);
    assert_eq!(provider.live_grants(), 1);

    tracker.complete_through(second);
    let summary = manager.refresh();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.heaps_released, 1);
    assert!(manager.heap(heap).is_none());
    assert_eq!(provider.live_grants(), 0);
    assert_eq!(manager.list(BlockState::Deleted).len(), 0);
    assert_eq!(manager.list(BlockState::Submitted).len(), 0);
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_free_of_last_retired_block_releases_pending_heap() {
    let (mut manager, tracker, provider) = setup(4096);
    let heap = manager.active_heap().unwrap();

    let block = manager.allocate_block(256, 1, None).unwrap();
    let frame = tracker.issue();
    manager.submit_block(block, frame).unwrap();
    assert_eq!(manager.unregister_heap(heap).unwrap(), UnregisterStatus::Pending);
    assert_eq!(provider.live_grants(), 1);

    tracker.complete_through(frame);
    manager.free_block(block).unwrap();

    assert!(manager.heap(heap).is_none());
    assert!(manager.block(block).is_none());
    assert_eq!(manager.heaps().count(), 0);
    assert_eq!(provider.live_grants(), 0);
    assert_eq!(provider.released_grants(), 1);
    assert_eq!(manager.list(BlockState::Deleted).len(), 0);
    assert_eq!(manager.list(BlockState::Submitted).len(), 0);
    assert!(manager.refresh().is_idle());
    assert!(manager.check_invariants().is_ok());
}

#[test]
fn test_frame_tokens_survive_wraparound() {
    let tracker = FrameTracker::starting_at(u32::MAX - 1);
    let before = tracker.issue();
    let after = tracker.issue();
    assert!(!tracker.is_expired(&after));

    tracker.complete_through(after);
    assert!(tracker.is_expired(&before));
    assert!(tracker.is_expired(&after));
    assert_eq!(tracker.merge(before, after), after);
}

#[test]
#[serial]
fn test_operations_run_under_installed_subscriber() {
    gpu_state_heap::init_tracing();
    // A second install is reported, never panics
    assert!(gpu_state_heap::try_init_tracing().is_err());

    let (mut manager, tracker, _) = setup(4096);
    let block = manager.allocate_block(64, 1, None).unwrap();
    manager.submit_block(block, tracker.issue()).unwrap();
    tracker.complete_all();
    assert_eq!(manager.refresh().reclaimed, 1);
}
