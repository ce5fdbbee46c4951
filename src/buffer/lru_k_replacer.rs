use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{AccessType, FrameId, Timestamp};

/// Access history for a single tracked frame
#[derive(Debug)]
struct LruKNode {
    /// Access timestamps, oldest at the front; at most k entries are kept
    history: VecDeque<Timestamp>,
    /// Whether this frame may currently be evicted
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }
}

#[derive(Default)]
struct ReplacerState {
    node_store: HashMap<FrameId, LruKNode>,
    /// Number of evictable frames
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// The victim is the frame whose backward k-distance (time since its k-th
/// most recent access) is largest. A frame with fewer than k recorded
/// accesses has +inf backward k-distance and is preferred; ties among such
/// frames break on the earliest overall access, and ties among frames with
/// full histories break on the earliest k-th previous access. Because the
/// history is trimmed to k entries, both tie-breaks reduce to the oldest
/// retained timestamp.
pub struct LruKReplacer {
    /// K value for the LRU-K algorithm
    k: usize,
    /// Maximum number of frames the replacer can track
    num_frames: usize,
    /// Logical clock, bumped once per recorded access
    clock: AtomicU64,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(k: usize, num_frames: usize) -> Self {
        assert!(k >= 1, "history depth must be at least 1");
        Self {
            k,
            num_frames,
            clock: AtomicU64::new(0),
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance and
    /// removes it from the replacer. Returns None if nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.curr_size == 0 {
            return None;
        }

        // Lexicographic minimum over (has full history, oldest retained
        // timestamp): frames short of k accesses come first, then earlier
        // timestamps within each class.
        let mut victim: Option<(bool, Timestamp, FrameId)> = None;
        for (&frame_id, node) in state.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            let oldest = *node
                .history
                .front()
                .expect("tracked frames always have at least one access");
            let candidate = (node.history.len() >= self.k, oldest, frame_id);
            if victim.map_or(true, |v| (candidate.0, candidate.1) < (v.0, v.1)) {
                victim = Some(candidate);
            }
        }

        let (_, _, frame_id) = victim?;
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
        tracing::trace!(frame = %frame_id, "lru-k victim selected");
        Some(frame_id)
    }

    /// Records an access to the given frame, creating its (non-evictable)
    /// node on first sight.
    ///
    /// # Panics
    /// Panics if `frame_id` is outside `[0, num_frames)` - that is a caller
    /// bug, not a recoverable condition.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id {frame_id} out of range for replacer of {} frames",
            self.num_frames
        );

        let timestamp = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new)
            .record(timestamp, self.k);
    }

    /// Flips a frame's evictable flag, keeping the evictable count in step.
    /// Untracked frames are ignored.
    ///
    /// # Panics
    /// Panics if `frame_id` is outside `[0, num_frames)`.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        assert!(
            frame_id.as_usize() < self.num_frames,
            "frame id {frame_id} out of range for replacer of {} frames",
            self.num_frames
        );

        let mut state = self.state.lock();
        let Some(node) = state.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable != is_evictable {
            node.is_evictable = is_evictable;
            if is_evictable {
                state.curr_size += 1;
            } else {
                state.curr_size -= 1;
            }
        }
    }

    /// Drops a frame from the replacer entirely, e.g. when its page is
    /// deleted. Untracked frames are ignored.
    ///
    /// # Panics
    /// Panics if the frame is tracked but not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let Some(node) = state.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {frame_id}"
        );
        state.node_store.remove(&frame_id);
        state.curr_size -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
