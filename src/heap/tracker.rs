/*!
 * Frame Tracker
 * Reference completion tracker driven by a shared frame counter
 */

use super::traits::CompletionTracker;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Frame number a submitted block waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameToken(pub u32);

impl FrameToken {
    /// Wrap-safe "is `self` at or before `other`"
    #[inline]
    fn reached_by(self, other: u32) -> bool {
        other.wrapping_sub(self.0) as i32 >= 0
    }
}

/// Completion tracker backed by a monotonically increasing frame counter
///
/// Clones share the same counters: the submission path keeps one clone to
/// issue tokens, the completion path keeps another to report GPU progress.
///
/// # Example
///
/// ```rust
/// use gpu_state_heap::{CompletionTracker, FrameTracker};
///
/// let tracker = FrameTracker::new();
/// let token = tracker.issue();
/// assert!(!tracker.is_expired(&token));
///
/// tracker.complete_through(token);
/// assert!(tracker.is_expired(&token));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FrameTracker {
    issued: Arc<AtomicU32>,
    completed: Arc<AtomicU32>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start both counters at `frame` (useful to exercise wrap-around)
    pub fn starting_at(frame: u32) -> Self {
        Self {
            issued: Arc::new(AtomicU32::new(frame)),
            completed: Arc::new(AtomicU32::new(frame)),
        }
    }

    /// Token for the next frame to be submitted
    pub fn issue(&self) -> FrameToken {
        FrameToken(self.issued.fetch_add(1, Ordering::AcqRel).wrapping_add(1))
    }

    /// Most recently issued frame
    pub fn last_issued(&self) -> FrameToken {
        FrameToken(self.issued.load(Ordering::Acquire))
    }

    /// Last frame the GPU reported complete
    pub fn completed(&self) -> FrameToken {
        FrameToken(self.completed.load(Ordering::Acquire))
    }

    /// Report GPU progress through `token`; never moves backwards
    pub fn complete_through(&self, token: FrameToken) {
        let mut current = self.completed.load(Ordering::Acquire);
        while !token.reached_by(current) {
            match self.completed.compare_exchange_weak(
                current,
                token.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark every issued frame complete
    pub fn complete_all(&self) {
        self.complete_through(self.last_issued());
    }
}

impl CompletionTracker for FrameTracker {
    type Token = FrameToken;

    fn is_expired(&self, token: &FrameToken) -> bool {
        token.reached_by(self.completed.load(Ordering::Acquire))
    }

    fn merge(&self, current: FrameToken, incoming: FrameToken) -> FrameToken {
        if current.reached_by(incoming.0) {
            incoming
        } else {
            current
        }
    }
}
