//! The pool: owner of a set of same-size, same-NUMA-node segments plus the
//! canonical main freelist, and the collector that reclaims freed blocks
//! and empty segments.
//!
//! Grounded on `hwmalloc::detail::pool` (its shape is implied rather than
//! kept verbatim in `original_source`) and exercised the way
//! `test/test_segment.cpp`'s `TEST(pool, construction)` does, driving
//! `allocate`/`free` in a loop exactly like the property test below.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use log::debug;
use parking_lot::Mutex;

use crate::block::Block;
use crate::domain::Cpu;
use crate::error::{Error, Result};
use crate::numa;
use crate::register::Backend;
use crate::segment::Segment;
use crate::sink::BlockSink;
use crate::stats::Stats;

/// Owns every [`Segment`] of one (block size, NUMA node) combination.
///
/// The segment list lives behind a mutex: the collector
/// pass must run single-threaded per pool, and growing the pool (creating a
/// segment) mutates the same list, so both slow paths share one lock. The
/// hot path — popping/pushing `main_freelist` — never touches it.
pub struct Pool<C: Backend<Cpu>> {
    context: Arc<C>,
    block_size: usize,
    segment_size: usize,
    numa_node: usize,
    never_free: bool,
    main_freelist: SegQueue<Block<C>>,
    segments: Mutex<Vec<Box<Segment<C>>>>,
    stats: Arc<Stats>,
}

impl<C: Backend<Cpu>> Pool<C> {
    pub fn new(
        context: Arc<C>,
        block_size: usize,
        segment_size: usize,
        numa_node: usize,
        never_free: bool,
        stats: Arc<Stats>,
    ) -> Self {
        debug_assert!(block_size > 0);
        debug_assert!(segment_size >= block_size);
        Pool {
            context,
            block_size,
            segment_size,
            numa_node,
            never_free,
            main_freelist: SegQueue::new(),
            segments: Mutex::new(Vec::new()),
            stats,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn numa_node(&self) -> usize {
        self.numa_node
    }

    /// Pop a block, running the collector and growing the pool as needed.
    pub fn allocate(&self) -> Result<Block<C>> {
        if let Some(b) = self.main_freelist.pop() {
            return Ok(b);
        }

        self.collect_pass();
        if let Some(b) = self.main_freelist.pop() {
            return Ok(b);
        }

        self.grow()?;
        self.main_freelist
            .pop()
            .ok_or_else(|| Error::OutOfHostMemory { requested: self.block_size, node: self.numa_node })
    }

    /// Dispatches to the block's owning segment. A no-op for
    /// user-registered (null-segment) blocks.
    pub fn free(&self, block: Block<C>) {
        block.release();
    }

    /// Creates one new segment of `segment_size` bytes on this pool's NUMA
    /// node, registers it with the context, and pushes its blocks straight
    /// onto `main_freelist`. The only operation here that blocks on
    /// external resources.
    fn grow(&self) -> Result<()> {
        let allocation = numa::allocate(self.segment_size, self.numa_node)?;
        let region = match self.context.register_memory(allocation.ptr, allocation.size) {
            Ok(r) => r,
            Err(e) => {
                numa::free(allocation);
                return Err(e);
            }
        };

        let segment = Box::new(Segment::new(self as *const Pool<C>, region, allocation, self.block_size));
        segment.populate(&self.main_freelist);

        debug!(
            "rmapool: created segment (block_size={}, numa_node={}, capacity={})",
            self.block_size,
            self.numa_node,
            segment.capacity()
        );
        self.stats.segments.increase(1);
        self.stats.reserved_bytes.increase(self.segment_size as i64);
        self.stats.allocations.increase(segment.capacity() as i64);

        self.segments.lock().push(segment);
        Ok(())
    }

    /// Drains every segment's freed-stack into the main freelist and
    /// destroys segments that end up empty (unless `never_free`). Runs
    /// under the segment-list lock, so at most one collector pass proceeds
    /// at a time per pool; other pools collect independently.
    pub fn collect_pass(&self) -> usize {
        let mut segments = self.segments.lock();
        let mut total = 0usize;
        let mut i = 0;
        while i < segments.len() {
            let collected = segments[i].collect(&self.main_freelist);
            total += collected;
            self.stats.allocations.decrease(collected as i64);
            if !self.never_free && segments[i].is_empty() {
                let removed = segments.remove(i);
                debug!(
                    "rmapool: destroying empty segment (block_size={}, numa_node={})",
                    removed.block_size(),
                    removed.numa_node()
                );
                self.stats.segments.decrease(1);
                self.stats.reserved_bytes.decrease(self.segment_size as i64);
                drop(removed);
            } else {
                i += 1;
            }
        }
        total
    }

    /// Number of segments currently owned by this pool. Exposed for tests.
    pub fn segment_count(&self) -> usize {
        self.segments.lock().len()
    }
}

// SAFETY: all shared state is either atomics, lock-free queues, or behind a
// mutex; `Segment<C>` requires `C::Region: Send/Sync` to be Send/Sync,
// which we require via `C: Send + Sync` here too.
unsafe impl<C: Backend<Cpu> + Send + Sync> Send for Pool<C> where C::Region: Send + Sync {}
unsafe impl<C: Backend<Cpu> + Send + Sync> Sync for Pool<C> where C::Region: Send + Sync {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;

    #[test]
    fn allocate_free_loop_grows_and_reuses_segments() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let page = numa::page_size();
        let pool = Pool::new(Arc::clone(&ctx), 8, page, 0, false, stats);

        for i in 0..512u32 {
            let b = pool.allocate().expect("allocate should succeed");
            if i % 2 == 0 {
                pool.free(b);
            }
        }
        assert!(pool.segment_count() >= 1);

        let b = pool.allocate().expect("allocate should succeed");
        pool.free(b);
    }

    #[test]
    fn collect_pass_reclaims_fully_freed_segment() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let page = numa::page_size();
        let pool = Pool::new(Arc::clone(&ctx), 8, page, 0, false, stats);

        let capacity = page / 8;
        let blocks: Vec<_> = (0..capacity).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.segment_count(), 1);
        for b in blocks {
            pool.free(b);
        }
        pool.collect_pass();
        assert_eq!(pool.segment_count(), 0);
    }

    #[test]
    fn capacity_plus_one_allocations_spill_into_a_second_segment() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let page = numa::page_size();
        let pool = Pool::new(Arc::clone(&ctx), 8, page, 0, false, stats);

        let capacity = page / 8;
        let blocks: Vec<_> = (0..capacity).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.segment_count(), 1);

        let overflow = pool.allocate().expect("pool should grow a second segment");
        assert_eq!(pool.segment_count(), 2);

        pool.free(overflow);
        for b in blocks {
            pool.free(b);
        }
    }

    #[test]
    fn freed_block_is_returned_by_the_next_allocate_once_collected() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let page = numa::page_size();
        // Segment capacity of exactly one block makes reuse deterministic:
        // after the sole block is freed and collected, it is the only block
        // the next allocate() can return. `never_free` keeps the segment
        // (and its backing memory) alive across the collector pass so the
        // reused address stays valid.
        let pool = Pool::new(Arc::clone(&ctx), page, page, 0, true, stats);

        let a = pool.allocate().expect("allocate should succeed");
        let addr = a.ptr;
        pool.free(a);

        let b = pool.allocate().expect("allocate should succeed");
        assert_eq!(b.ptr, addr);
        pool.free(b);
    }

    #[test]
    fn never_free_keeps_empty_segments() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let page = numa::page_size();
        let pool = Pool::new(Arc::clone(&ctx), 8, page, 0, true, stats);

        let capacity = page / 8;
        let blocks: Vec<_> = (0..capacity).map(|_| pool.allocate().unwrap()).collect();
        for b in blocks {
            pool.free(b);
        }
        pool.collect_pass();
        assert_eq!(pool.segment_count(), 1);
    }
}
