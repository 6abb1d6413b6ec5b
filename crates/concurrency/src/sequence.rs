//! Commit sequence numbers
//!
//! Every committed transaction gets the next number from a single counter.
//! Numbers start after the highest one found in the log on open, so they are
//! strictly increasing across restarts.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic commit sequence
#[derive(Debug)]
pub struct Sequence {
    last: AtomicU64,
}

impl Sequence {
    /// Sequence whose first allocation is `last + 1`
    pub fn starting_after(last: u64) -> Self {
        Sequence {
            last: AtomicU64::new(last),
        }
    }

    /// Last allocated number (0 if nothing was allocated)
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Allocate the next number
    pub fn allocate(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_continues_after_recovered_value() {
        let seq = Sequence::starting_after(41);
        assert_eq!(seq.current(), 41);
        assert_eq!(seq.allocate(), 42);
        assert_eq!(seq.allocate(), 43);
        assert_eq!(seq.current(), 43);
    }
}
