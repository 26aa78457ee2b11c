use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable identity of an entity. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceId(pub u64);

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing [`ReferenceId`]s. Safe to share.
#[derive(Debug)]
pub struct ReferenceAllocator {
    next: AtomicU64,
}

impl ReferenceAllocator {
    /// Create an allocator whose first id is 1 (0 is never issued).
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Issue the next id.
    pub fn next(&self) -> ReferenceId {
        ReferenceId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ReferenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REFERENCES: ReferenceAllocator = ReferenceAllocator::new();

/// Issue a process-wide unique [`ReferenceId`].
pub fn next_reference() -> ReferenceId {
    GLOBAL_REFERENCES.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_id_equality() {
        let a = ReferenceId(7);
        let b = ReferenceId(7);
        let c = ReferenceId(8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn allocator_starts_at_one_and_increments() {
        let alloc = ReferenceAllocator::new();
        assert_eq!(alloc.next(), ReferenceId(1));
        assert_eq!(alloc.next(), ReferenceId(2));
    }

    #[test]
    fn global_references_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| next_reference()).collect::<Vec<_>>()))
            .collect();
        let mut all = std::collections::HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate reference {id}");
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn reference_display() {
        assert_eq!(ReferenceId(42).to_string(), "#42");
    }
}
