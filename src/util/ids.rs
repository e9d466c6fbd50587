//! Identifier allocation shared by clients and entities

use std::sync::atomic::{AtomicU32, Ordering};

/// Reserved id meaning "nobody"
pub const INVALID_ID: u32 = u32::MAX;

/// Monotonic id source starting at 1
///
/// Ids are never recycled. Once the space is exhausted `next` returns `None`
/// rather than wrapping onto ids that may still be live.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next(&self) -> Option<u32> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                (id != INVALID_ID).then(|| id + 1)
            })
            .ok()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
