/*!
 * Deferred Reclamation
 * Retires submitted blocks once their completion token expires
 */

use super::super::list::Position;
use super::super::traits::CompletionTracker;
use super::super::types::{BlockState, RefreshSummary};
use super::allocator::Release;
use super::BlockManager;
use crate::monitoring::span_operation;
use tracing::{debug, warn};

impl<T: CompletionTracker> BlockManager<T> {
    /// Reclaim every submitted block whose token has expired
    ///
    /// Expired blocks are freed, or moved back to the allocated list when
    /// pinned. Blocks of a heap pending deletion are parked on the deleted
    /// list, and the heap is released with its last one. The scan covers the
    /// whole submitted list: tokens from different sources need not expire
    /// in submission order.
    pub fn refresh(&mut self) -> RefreshSummary {
        let span = span_operation("refresh");
        let mut summary = RefreshSummary::default();

        let submitted = self.lists[BlockState::Submitted.index()].indices(&self.pool);
        for index in submitted {
            let block = self.pool.block(index);
            // Records of a heap released earlier in this pass are back in the pool
            if block.state != BlockState::Submitted {
                continue;
            }
            let expired = block
                .token
                .as_ref()
                .map_or(true, |token| self.tracker.is_expired(token));
            if !expired {
                summary.in_flight += 1;
                continue;
            }

            let (id, pending_delete, is_static) = (block.id, block.pending_delete, block.is_static);
            if pending_delete {
                match self.release(index) {
                    Ok(Release::HeapReleased) => {
                        summary.deleted += 1;
                        summary.heaps_released += 1;
                    }
                    Ok(_) => summary.deleted += 1,
                    Err(e) => warn!(block = id, error = %e, "Failed to retire deleted block"),
                }
            } else if is_static {
                match self.move_block(index, BlockState::Allocated, Position::Tail) {
                    Ok(()) => {
                        self.pool.block_mut(index).token = None;
                        summary.revalidated += 1;
                    }
                    Err(e) => warn!(block = id, error = %e, "Failed to revalidate pinned block"),
                }
            } else {
                match self.release(index) {
                    Ok(_) => summary.reclaimed += 1,
                    Err(e) => warn!(block = id, error = %e, "Failed to reclaim block"),
                }
            }
        }

        span.record_items_processed(summary.reclaimed + summary.revalidated + summary.deleted);
        span.record_result(true);
        if !summary.is_idle() {
            debug!(
                reclaimed = summary.reclaimed,
                revalidated = summary.revalidated,
                deleted = summary.deleted,
                in_flight = summary.in_flight,
                heaps_released = summary.heaps_released,
                "Refreshed submitted blocks"
            );
        }
        summary
    }
}
