use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Per-frame access history. The deque is trimmed to the most recent K
/// timestamps, oldest at the front, so for a frame with a full history the
/// front entry is exactly the Kth most recent access.
#[derive(Debug, Default)]
struct FrameRecord {
    history: VecDeque<Timestamp>,
    evictable: bool,
}

#[derive(Default)]
struct ReplacerInner {
    clock: Timestamp,
    records: HashMap<FrameId, FrameRecord>,
    evictable_count: usize,
}

/// LRU-K replacement policy.
///
/// Eviction prefers frames with fewer than K recorded accesses - they have
/// no defined backward K-distance and count as infinitely far away. Among
/// those, the one with the earliest first access goes first (classic LRU
/// tiebreak). If every candidate has a full history, the one whose Kth most
/// recent access is oldest is evicted.
pub struct LruKReplacer {
    k: usize,
    max_frames: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            max_frames,
            inner: Mutex::new(ReplacerInner::default()),
        }
    }

    /// Records an access to `frame_id` at the next logical timestamp.
    /// Unseen frames are allocated non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();

        let timestamp = inner.clock;
        inner.clock += 1;

        let record = inner.records.entry(frame_id).or_default();
        record.history.push_back(timestamp);
        while record.history.len() > self.k {
            record.history.pop_front();
        }
    }

    /// Toggles whether `frame_id` may be evicted. A no-op for frames the
    /// replacer has never seen.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(record) = inner.records.get_mut(&frame_id) else {
            return;
        };
        if record.evictable != evictable {
            record.evictable = evictable;
            if evictable {
                inner.evictable_count += 1;
            } else {
                inner.evictable_count -= 1;
            }
        }
    }

    /// Drops `frame_id` from the replacer. Removing a frame that is not
    /// evictable is a programmer error.
    pub fn remove(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();

        if let Some(record) = inner.records.get(&frame_id) {
            assert!(
                record.evictable,
                "remove() called on non-evictable {}",
                frame_id
            );
            inner.records.remove(&frame_id);
            inner.evictable_count -= 1;
        }
    }

    /// Selects and removes a victim per the LRU-K policy. Returns None if
    /// no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        let mut victim: Option<(FrameId, bool, Timestamp)> = None;
        for (&frame_id, record) in &inner.records {
            if !record.evictable {
                continue;
            }
            let incomplete = record.history.len() < self.k;
            // With trimmed histories, the front is the first access for an
            // incomplete history and the Kth most recent for a full one;
            // in both tiers the smaller front timestamp wins.
            let front = *record.history.front().expect("evictable frame with no accesses");

            let better = match victim {
                None => true,
                Some((_, v_incomplete, v_front)) => {
                    if incomplete != v_incomplete {
                        incomplete
                    } else {
                        front < v_front
                    }
                }
            };
            if better {
                victim = Some((frame_id, incomplete, front));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.records.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    /// Number of currently evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.max_frames,
            "{} out of range for replacer of {} frames",
            frame_id,
            self.max_frames
        );
    }
}
