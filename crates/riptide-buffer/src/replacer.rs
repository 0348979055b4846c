//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Removes and returns the frame that has been evictable the longest.
    ///
    /// Returns None if no frames are evictable.
    fn victim(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer (the frame is in use again).
    fn pin(&self, frame_id: FrameId);

    /// Makes a frame a candidate for eviction.
    ///
    /// No-op if the frame is already a candidate or the replacer is at
    /// capacity.
    fn unpin(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Sentinel for "no frame" in the linked list.
const NIL: u32 = u32::MAX;

/// LRU replacement algorithm implementation.
///
/// Frames are kept in unpin order: `unpin` inserts at the most-recent end,
/// `victim` removes from the least-recent end. Frame ids are dense indices
/// into the pool's frame array, so recency is tracked with an array-backed
/// doubly-linked list giving O(1) victim/pin/unpin.
pub struct LruReplacer {
    /// Maximum number of evictable frames.
    capacity: usize,
    /// Internal state protected by mutex.
    inner: Mutex<LruInner>,
}

struct LruInner {
    /// Most recently unpinned frame.
    head: u32,
    /// Least recently unpinned frame (next victim).
    tail: u32,
    /// prev[f]: neighbor toward the head, NIL at the head.
    prev: Vec<u32>,
    /// next[f]: neighbor toward the tail, NIL at the tail.
    next: Vec<u32>,
    /// Whether frame f is currently linked.
    linked: Vec<bool>,
    /// Number of linked frames.
    len: usize,
}

impl LruInner {
    fn unlink(&mut self, id: u32) {
        let (p, n) = (self.prev[id as usize], self.next[id as usize]);
        if p == NIL {
            self.head = n;
        } else {
            self.next[p as usize] = n;
        }
        if n == NIL {
            self.tail = p;
        } else {
            self.prev[n as usize] = p;
        }
        self.prev[id as usize] = NIL;
        self.next[id as usize] = NIL;
        self.linked[id as usize] = false;
        self.len -= 1;
    }

    fn push_front(&mut self, id: u32) {
        self.prev[id as usize] = NIL;
        self.next[id as usize] = self.head;
        if self.head != NIL {
            self.prev[self.head as usize] = id;
        } else {
            self.tail = id;
        }
        self.head = id;
        self.linked[id as usize] = true;
        self.len += 1;
    }
}

impl LruReplacer {
    /// Creates a new LRU replacer with the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                head: NIL,
                tail: NIL,
                prev: vec![NIL; capacity],
                next: vec![NIL; capacity],
                linked: vec![false; capacity],
                len: 0,
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let tail = inner.tail;
        if tail == NIL {
            return None;
        }
        inner.unlink(tail);
        Some(FrameId(tail))
    }

    fn pin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.capacity {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.linked[frame_id.0 as usize] {
            inner.unlink(frame_id.0);
        }
    }

    fn unpin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.capacity {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.linked[frame_id.0 as usize] || inner.len == self.capacity {
            return;
        }
        inner.push_front(frame_id.0);
    }

    fn size(&self) -> usize {
        self.inner.lock().len
    }
}
