/*!
 * Statistics and Consistency Checks
 */

use super::super::traits::CompletionTracker;
use super::super::types::{BlockManagerStats, BlockState, ListStats};
use super::BlockManager;
use crate::core::types::Size;

impl<T: CompletionTracker> BlockManager<T> {
    /// Snapshot of heap usage and list occupancy
    pub fn stats(&self) -> BlockManagerStats {
        let mut stats = BlockManagerStats {
            heap_count: 0,
            heaps_pending_deletion: 0,
            total_bytes: 0,
            used_bytes: 0,
            free_bytes: 0,
            usage_percentage: 0.0,
            largest_free_block: self.largest_free(None),
            pool_records: self.pool.len(),
            pool_record_limit: self.pool.max_records(),
            pool: self.list_stats(BlockState::Pool),
            free: self.list_stats(BlockState::Free),
            allocated: self.list_stats(BlockState::Allocated),
            submitted: self.list_stats(BlockState::Submitted),
            deleted: self.list_stats(BlockState::Deleted),
        };

        for heap in self.heaps() {
            stats.heap_count += 1;
            if heap.deletion_pending {
                stats.heaps_pending_deletion += 1;
                continue;
            }
            stats.total_bytes += heap.total_size();
            stats.used_bytes += heap.used;
            stats.free_bytes += heap.free;
        }

        if stats.total_bytes > 0 {
            stats.usage_percentage = stats.used_bytes as f64 / stats.total_bytes as f64 * 100.0;
        }
        stats
    }

    fn list_stats(&self, state: BlockState) -> ListStats {
        let list = &self.lists[state.index()];
        ListStats {
            count: list.len(),
            bytes: list.size(),
        }
    }

    /// Verify every structural invariant, listing each violation found
    ///
    /// Checks that adjacency chains are gap-free and cover their heaps, that
    /// heap counters match their blocks, that no two neighbours are both
    /// free, and that list aggregates match list contents.
    pub fn check_invariants(&self) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        let mut chained = 0;

        for heap in self.heaps() {
            let id = heap.id;
            let mut expected_offset = 0;
            let mut used: Size = 0;
            let mut free: Size = 0;
            let mut previous_free = false;

            for index in heap.chain(&self.pool) {
                chained += 1;
                let block = self.pool.block(index);
                if block.heap != Some(id) {
                    violations.push(format!("{id}: block {} claims heap {:?}", block.id, block.heap));
                }
                if block.offset != expected_offset {
                    violations.push(format!(
                        "{id}: block {} at offset {} leaves a gap or overlap at {expected_offset}",
                        block.id, block.offset
                    ));
                }
                expected_offset = block.end();

                match block.state {
                    BlockState::Free => {
                        if previous_free {
                            violations.push(format!("{id}: free block {} follows a free block", block.id));
                        }
                        free += block.size;
                    }
                    BlockState::Allocated | BlockState::Submitted => used += block.size,
                    BlockState::Deleted => {}
                    BlockState::Pool => {
                        violations.push(format!("{id}: pool record {} on adjacency chain", block.id));
                    }
                }
                previous_free = block.state == BlockState::Free;
            }

            if expected_offset != heap.total_size() {
                violations.push(format!(
                    "{id}: blocks cover {expected_offset} of {} bytes",
                    heap.total_size()
                ));
            }
            if heap.used != used || heap.free != free {
                violations.push(format!(
                    "{id}: counters used={} free={} but blocks hold used={used} free={free}",
                    heap.used, heap.free
                ));
            }
            if !heap.deletion_pending && heap.used + heap.free != heap.total_size() {
                violations.push(format!(
                    "{id}: used {} + free {} != total {}",
                    heap.used,
                    heap.free,
                    heap.total_size()
                ));
            }
            if let Some(scratch) = heap.scratch {
                let block = self.pool.block(scratch);
                if block.heap != Some(id)
                    || !matches!(block.state, BlockState::Allocated | BlockState::Submitted)
                {
                    violations.push(format!("{id}: scratch block {} is {}", block.id, block.state));
                }
            }
        }

        let mut listed = 0;
        for state in BlockState::ALL {
            let list = &self.lists[state.index()];
            let indices = list.indices(&self.pool);
            let bytes: Size = indices.iter().map(|&i| self.pool.block(i).size).sum();
            if indices.len() != list.len() || bytes != list.size() {
                violations.push(format!(
                    "{state} list reports {} blocks / {} bytes but holds {} / {bytes}",
                    list.len(),
                    list.size(),
                    indices.len()
                ));
            }
            if let Some(&stray) = indices.iter().find(|&&i| self.pool.block(i).state != state) {
                violations.push(format!(
                    "{state} list holds block {} in state {}",
                    self.pool.block(stray).id,
                    self.pool.block(stray).state
                ));
            }
            listed += indices.len();
        }

        if listed != self.pool.len() {
            violations.push(format!(
                "{listed} records listed but the pool owns {}",
                self.pool.len()
            ));
        }
        let pool_listed = self.lists[BlockState::Pool.index()].len();
        if chained + pool_listed != self.pool.len() {
            violations.push(format!(
                "{chained} chained + {pool_listed} spare records != {} owned",
                self.pool.len()
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
