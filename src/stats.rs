//! Allocator statistics: atomic counters updated only on the slow paths
//! (segment creation/destruction, collector passes), never on the
//! uncontended allocate/free hot path.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct StatCount {
    allocated: AtomicI64,
    freed: AtomicI64,
    peak: AtomicI64,
    current: AtomicI64,
}

impl StatCount {
    pub fn increase(&self, amount: i64) {
        self.update(amount);
    }

    pub fn decrease(&self, amount: i64) {
        self.update(-amount);
    }

    fn update(&self, amount: i64) {
        if amount == 0 {
            return;
        }
        let current = self.current.fetch_add(amount, Ordering::Relaxed) + amount;
        self.peak.fetch_max(current, Ordering::Relaxed);
        if amount > 0 {
            self.allocated.fetch_add(amount, Ordering::Relaxed);
        } else {
            self.freed.fetch_add(-amount, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatCountSnapshot {
        StatCountSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            current: self.current.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatCountSnapshot {
    pub allocated: i64,
    pub freed: i64,
    pub peak: i64,
    pub current: i64,
}

#[derive(Default)]
pub struct StatCounter {
    total: AtomicU64,
    count: AtomicU64,
}

impl StatCounter {
    pub fn add(&self, value: u64) {
        self.total.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Process-wide allocator statistics, one instance per [`crate::heap::TieredHeap`].
#[derive(Default)]
pub struct Stats {
    pub segments: StatCount,
    pub reserved_bytes: StatCount,
    pub allocations: StatCount,
    pub allocate_failures: StatCounter,
    pub huge_heaps_created: StatCounter,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub segments: StatCountSnapshot,
    pub reserved_bytes: StatCountSnapshot,
    pub allocations: StatCountSnapshot,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments: self.segments.snapshot(),
            reserved_bytes: self.reserved_bytes.snapshot(),
            allocations: self.allocations.snapshot(),
        }
    }
}
