use std::sync::atomic::{AtomicU64, Ordering};

pub type Timestamp = u64;

/// Monotonic source of ordering timestamps. Stamps transaction starts,
/// statement boundaries and commits; a timestamp is never reused.
#[derive(Debug)]
pub struct TimestampOracle {
    current: AtomicU64,
}

impl TimestampOracle {
    pub fn new() -> TimestampOracle {
        TimestampOracle {
            current: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> Timestamp {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> Timestamp {
        self.current.load(Ordering::SeqCst)
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new()
    }
}
