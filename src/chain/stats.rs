//! Per-chain counters, exposed for diagnostics and tests.
//!
//! Each counter lives in its own cache line (`CachePadded`): producers bump
//! `pushed`/`overflowed` and consumers bump `extracted` from different
//! threads on every hot-path call, so packing them into adjacent words would
//! make every push and extract fight over the same cache line.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

#[derive(Debug, Default)]
pub struct ChainStats {
    pushed: CachePadded<AtomicU64>,
    extracted: CachePadded<AtomicU64>,
    overflowed: CachePadded<AtomicU64>,
}

impl ChainStats {
    pub(crate) fn record_push(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_extract(&self) {
        self.extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow(&self) {
        self.overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn extracted(&self) -> u64 {
        self.extracted.load(Ordering::Relaxed)
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}
