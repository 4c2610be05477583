// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine-wide accounting.
//!
//! The used-memory gauge drives the admission quota: element payload bytes
//! are added when a chain grows and subtracted when the data ring reclaims
//! it. The remaining counters are relaxed-ordering observability; nothing
//! but [`Stats::full`] feeds back into control flow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by applets and the housekeeper.
#[derive(Debug)]
pub struct Stats {
    limit: u64,
    used_mem: AtomicU64,
    pub hits: AtomicU64,
    pub disk_hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub deletes: AtomicU64,
    pub reclaimed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsSnapshot {
    pub used_mem: u64,
    pub hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub reclaimed: u64,
}

impl Stats {
    /// Counters zeroed, quota set to `data_size` bytes.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used_mem: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    /// True once used memory reaches the data budget; new CREATE requests
    /// fail with 507 until the housekeeper reclaims.
    pub fn full(&self) -> bool {
        self.used_mem.load(Ordering::Relaxed) >= self.limit
    }

    pub fn used_mem(&self) -> u64 {
        self.used_mem.load(Ordering::Relaxed)
    }

    pub(crate) fn add_used(&self, bytes: u64) {
        self.used_mem.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn sub_used(&self, bytes: u64) {
        // Saturate rather than wrap if accounting ever drifts.
        let mut cur = self.used_mem.load(Ordering::Relaxed);
        loop {
            let next = cur.saturating_sub(bytes);
            match self.used_mem.compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            used_mem: self.used_mem.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_threshold() {
        let stats = Stats::new(100);
        assert!(!stats.full());
        stats.add_used(99);
        assert!(!stats.full());
        stats.add_used(1);
        assert!(stats.full());
        stats.sub_used(1);
        assert!(!stats.full());
    }

    #[test]
    fn test_sub_used_saturates() {
        let stats = Stats::new(100);
        stats.add_used(10);
        stats.sub_used(50);
        assert_eq!(stats.used_mem(), 0);
    }

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = Stats::new(10);
        stats.hits.fetch_add(3, Ordering::Relaxed);
        stats.writes.fetch_add(2, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.writes, 2);
        assert_eq!(snap.misses, 0);
    }
}
