//! Sequence id allocation and per-client mapping.
//!
//! One allocator is shared by every client connection of a proxy so that
//! upstream-side sequence ids are unique within the proxy; each backend's
//! pending-reply registry can then be keyed by sequence id alone without
//! collisions between clients.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

/// Monotonic 32-bit sequence id allocator. Wraps on overflow.
#[derive(Debug, Default)]
pub struct SeqIdAllocator {
    next: AtomicI32,
}

impl SeqIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&self) -> i32 {
        // Relaxed is enough: only uniqueness matters, not ordering.
        self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Per-client map from the proxy-allocated sequence id back to the id the
/// client sent. An entry lives from dispatch until the response is
/// delivered or the client disconnects.
#[derive(Debug, Default)]
pub struct SeqIdMapper {
    ids: Mutex<HashMap<i32, i32>>,
}

impl SeqIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self, old_seq_id: i32, new_seq_id: i32) {
        self.ids.lock().unwrap().insert(new_seq_id, old_seq_id);
    }

    /// Atomically fetches and deletes the original id for `new_seq_id`.
    pub fn remove(&self, new_seq_id: i32) -> Option<i32> {
        self.ids.lock().unwrap().remove(&new_seq_id)
    }

    /// Number of requests still awaiting a response.
    pub fn len(&self) -> usize {
        self.ids.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_alloc_is_monotonic() {
        let allocator = SeqIdAllocator::new();
        assert_eq!(allocator.alloc(), 1);
        assert_eq!(allocator.alloc(), 2);
        assert_eq!(allocator.alloc(), 3);
    }

    #[test]
    fn test_alloc_wraps_on_overflow() {
        let allocator = SeqIdAllocator::new();
        allocator.next.store(i32::MAX, Ordering::Relaxed);
        assert_eq!(allocator.alloc(), i32::MIN);
        assert_eq!(allocator.alloc(), i32::MIN + 1);
    }

    #[test]
    fn test_alloc_unique_across_threads() {
        let allocator = Arc::new(SeqIdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let allocator = Arc::clone(&allocator);
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| allocator.alloc()).collect::<Vec<i32>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate sequence id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_mapper_remove_is_fetch_and_delete() {
        let mapper = SeqIdMapper::new();
        mapper.map(42, 1);
        assert_eq!(mapper.len(), 1);
        assert_eq!(mapper.remove(1), Some(42));
        assert_eq!(mapper.remove(1), None);
        assert!(mapper.is_empty());
    }

    #[test]
    fn test_mapper_same_client_id_for_many_requests() {
        // Several in-flight requests may all carry the client's seq id 1;
        // the proxy-side ids keep them apart.
        let mapper = SeqIdMapper::new();
        mapper.map(1, 100);
        mapper.map(1, 101);
        mapper.map(1, 102);
        assert_eq!(mapper.remove(101), Some(1));
        assert_eq!(mapper.remove(100), Some(1));
        assert_eq!(mapper.remove(102), Some(1));
    }
}
