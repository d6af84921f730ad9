//! Eviction policy seam of the buffer pool.

use std::fmt::Debug;

/// Slot of the buffer pool a resident page occupies.
pub type FrameId = u32;

/// Tracks which frames hold no pins and picks the next one to reuse.
///
/// The pool calls `pin` each time a frame is pinned and `unpin`
/// when its last [`PageRef`](super::PageRef) is dropped. Only unpinned
/// frames may ever be returned by `evict`.
pub trait Replacer: Send + Sync + Debug {
    /// Removes and returns the victim frame, or `None` when every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    fn pin(&mut self, frame_id: FrameId);

    fn unpin(&mut self, frame_id: FrameId);

    /// Number of frames that could be evicted right now.
    fn evictable(&self) -> usize;
}
