use super::replacer::{FrameId, Replacer};
use std::collections::{HashSet, VecDeque};

/// Evicts the frame whose last release is the oldest.
#[derive(Debug)]
pub struct LruReplacer {
    /// Evictable frames, least recently released at the front
    lru_list: VecDeque<FrameId>,
    evictable: HashSet<FrameId>,
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            lru_list: VecDeque::with_capacity(max_size),
            evictable: HashSet::with_capacity(max_size),
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let frame_id = self.lru_list.pop_front()?;
        self.evictable.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if self.evictable.remove(&frame_id) {
            self.lru_list.retain(|&id| id != frame_id);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.lru_list.len() < self.max_size && self.evictable.insert(frame_id) {
            self.lru_list.push_back(frame_id);
        }
    }

    fn evictable(&self) -> usize {
        self.lru_list.len()
    }
}
