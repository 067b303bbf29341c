//! Lamport logical clock for causal ordering.
//!
//! A single process-wide counter shared by every session reader and the
//! executor. All updates go through atomic compare-and-swap, so the clock is
//! safe under unbounded concurrent callers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lamport clock.
///
/// `tick` marks a local event; `merge` folds in a peer's timestamp on
/// receipt. Receipt is itself an event, so `merge` always lands strictly
/// above both inputs.
#[derive(Debug, Default)]
pub struct LamportClock {
    time: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self {
            time: AtomicU64::new(0),
        }
    }

    /// Advance for a local event and return the new value.
    pub fn tick(&self) -> u64 {
        self.time.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Fold in a timestamp received from a peer.
    ///
    /// Settles on `max(current, received) + 1` — never merely the max, since
    /// the receipt is an event of its own.
    pub fn merge(&self, received: u64) -> u64 {
        let mut current = self.time.load(Ordering::Acquire);
        loop {
            let next = current.max(received) + 1;
            match self.time.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Read-only snapshot with no event semantics.
    pub fn peek(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }
}
