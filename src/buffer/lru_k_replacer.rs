use std::collections::{HashMap, VecDeque};

use crate::common::{FrameId, Timestamp};

/// Access history for a single frame.
#[derive(Debug)]
struct FrameAccessInfo {
    /// Up to k access timestamps, most recent at the back
    history: VecDeque<Timestamp>,
    /// Whether this frame may currently be evicted
    is_evictable: bool,
}

impl FrameAccessInfo {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance at `now`, or None for +inf (fewer than k accesses).
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_access(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }

    fn latest_access(&self) -> Option<Timestamp> {
        self.history.back().copied()
    }
}

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance,
/// where the k-distance is the time since the k-th most recent access and
/// frames with fewer than k accesses count as +inf. Ties among +inf frames
/// break towards the earliest first access; ties among finite distances
/// towards the oldest most recent access.
///
/// The replacer carries no locking of its own: the buffer pool owns it
/// behind its single pool-wide mutex.
pub struct LruKReplacer {
    k: usize,
    /// Frames with ids at or above this bound are ignored
    max_frames: usize,
    current_timestamp: Timestamp,
    frame_info: HashMap<FrameId, FrameAccessInfo>,
    num_evictable: usize,
}

impl LruKReplacer {
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            k,
            max_frames,
            current_timestamp: 0,
            frame_info: HashMap::new(),
            num_evictable: 0,
        }
    }

    /// Picks, forgets, and returns the victim frame, or None when no frame
    /// is evictable (the caller treats this as pool exhaustion).
    pub fn evict(&mut self) -> Option<FrameId> {
        if self.num_evictable == 0 {
            return None;
        }

        let now = self.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_info: Option<&FrameAccessInfo> = None;

        for (frame_id, info) in self.frame_info.iter() {
            if !info.is_evictable {
                continue;
            }
            let replace = match victim_info {
                None => true,
                Some(best) => {
                    match (best.k_distance(now, self.k), info.k_distance(now, self.k)) {
                        // current best is +inf, candidate is finite
                        (None, Some(_)) => false,
                        // candidate is +inf, current best is finite
                        (Some(_), None) => true,
                        // both +inf: earliest first access wins
                        (None, None) => info.earliest_access() < best.earliest_access(),
                        (Some(best_dist), Some(dist)) => {
                            if dist != best_dist {
                                dist > best_dist
                            } else {
                                // equal distances: oldest most recent access wins
                                info.latest_access() < best.latest_access()
                            }
                        }
                    }
                }
            };
            if replace {
                victim = Some(*frame_id);
                victim_info = Some(info);
            }
        }

        if let Some(frame_id) = victim {
            self.frame_info.remove(&frame_id);
            self.num_evictable -= 1;
        }
        victim
    }

    /// Records an access to the given frame at the current timestamp.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;
        self.frame_info
            .entry(frame_id)
            .or_insert_with(FrameAccessInfo::new)
            .record_access(timestamp, self.k);
    }

    /// Marks a frame evictable or not. The buffer pool calls this when a
    /// frame's pin count reaches zero (evictable) or it gets pinned again.
    pub fn set_evictable(&mut self, frame_id: FrameId, is_evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }
        match self.frame_info.get_mut(&frame_id) {
            Some(info) => {
                if info.is_evictable != is_evictable {
                    if is_evictable {
                        self.num_evictable += 1;
                    } else {
                        self.num_evictable -= 1;
                    }
                    info.is_evictable = is_evictable;
                }
            }
            None if is_evictable => {
                let mut info = FrameAccessInfo::new();
                info.is_evictable = true;
                self.frame_info.insert(frame_id, info);
                self.num_evictable += 1;
            }
            None => {}
        }
    }

    /// Forgets a frame entirely. Returns false if the frame is tracked but
    /// not evictable, which is a bug in the caller.
    pub fn remove(&mut self, frame_id: FrameId) -> bool {
        match self.frame_info.get(&frame_id) {
            Some(info) if !info.is_evictable => false,
            Some(_) => {
                self.frame_info.remove(&frame_id);
                self.num_evictable -= 1;
                true
            }
            None => true,
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
