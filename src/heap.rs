//! The tiered heap: the top-level entity, routing a requested size to one
//! of five size classes (tiny, small, large, huge, and an on-demand "Huge"
//! tier for anything above `max_size`), following
//! `original_source/include/hwmalloc/heap.hpp`'s `hwmalloc::heap`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::Block;
use crate::domain::Cpu;
use crate::error::{Error, Result};
use crate::fixed_heap::FixedSizeHeap;
use crate::numa;
use crate::register::Backend;
use crate::stats::{Stats, StatsSnapshot};

const TINY_LIMIT: usize = 128;
const SMALL_LIMIT: usize = 1024;
const LARGE_LIMIT: usize = 65536;

const TINY_INCREMENT: usize = 8;
const TINY_SEGMENT: usize = 16 * 1024;
const SMALL_SEGMENT: usize = 32 * 1024;
const LARGE_SEGMENT: usize = 64 * 1024;

/// `TieredHeap` construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Largest block size handled by the fixed "huge" tier; rounded up to a
    /// power of two and floored at `131072` (`s_large_limit * 2`), matching
    /// `hwmalloc::heap`'s constructor default.
    pub max_size: usize,
    /// When set, empty segments are retained for reuse instead of being
    /// destroyed by the collector.
    pub never_free: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_size: LARGE_LIMIT * 2, never_free: false }
    }
}

fn tiny_index(size: usize) -> usize {
    ((size + TINY_INCREMENT - 1) / TINY_INCREMENT).saturating_sub(1)
}

/// Smallest power-of-two block size accommodating `size`, for the
/// small/large/huge tiers (all of which start at 256). Only called for
/// `size > TINY_LIMIT`, so the result is always >= 256: `next_power_of_two`
/// of anything in `129..=256` is already 256.
fn tiered_block_size(size: usize) -> usize {
    size.next_power_of_two()
}

/// The top-level allocator: size-class router plus an on-demand map for
/// sizes larger than `max_size` ("Huge", per its capitalization).
pub struct TieredHeap<C: Backend<Cpu>> {
    context: Arc<C>,
    max_size: usize,
    never_free: bool,
    num_numa_nodes: usize,
    tiny_heaps: Vec<FixedSizeHeap<C>>,
    heaps: Vec<FixedSizeHeap<C>>,
    huge_heaps: Mutex<HashMap<usize, Arc<FixedSizeHeap<C>>>>,
    stats: Arc<Stats>,
}

impl<C: Backend<Cpu> + Send + Sync + 'static> TieredHeap<C> {
    pub fn new(context: C, config: Config) -> Self {
        Self::with_numa_nodes(context, config, numa::node_count())
    }

    pub fn with_numa_nodes(context: C, config: Config, num_numa_nodes: usize) -> Self {
        let context = Arc::new(context);
        let stats = Arc::new(Stats::default());
        let max_size = config.max_size.next_power_of_two().max(LARGE_LIMIT * 2);
        let num_numa_nodes = num_numa_nodes.max(1);

        let tiny_heaps = (0..(TINY_LIMIT / TINY_INCREMENT))
            .map(|i| {
                FixedSizeHeap::new(
                    Arc::clone(&context),
                    TINY_INCREMENT * (i + 1),
                    TINY_SEGMENT,
                    config.never_free,
                    num_numa_nodes,
                    Arc::clone(&stats),
                )
            })
            .collect();

        let mut heaps = Vec::new();
        let mut block_size = SMALL_LIMIT / 4; // 256
        while block_size <= SMALL_LIMIT {
            heaps.push(FixedSizeHeap::new(
                Arc::clone(&context),
                block_size,
                SMALL_SEGMENT,
                config.never_free,
                num_numa_nodes,
                Arc::clone(&stats),
            ));
            block_size *= 2;
        }
        while block_size <= LARGE_LIMIT {
            heaps.push(FixedSizeHeap::new(
                Arc::clone(&context),
                block_size,
                LARGE_SEGMENT,
                config.never_free,
                num_numa_nodes,
                Arc::clone(&stats),
            ));
            block_size *= 2;
        }
        while block_size <= max_size {
            heaps.push(FixedSizeHeap::new(
                Arc::clone(&context),
                block_size,
                block_size,
                config.never_free,
                num_numa_nodes,
                Arc::clone(&stats),
            ));
            block_size *= 2;
        }

        TieredHeap {
            context,
            max_size,
            never_free: config.never_free,
            num_numa_nodes,
            tiny_heaps,
            heaps,
            huge_heaps: Mutex::new(HashMap::new()),
            stats,
        }
    }

    pub fn allocate(&self, size: usize, numa_node: usize) -> Result<Block<C>> {
        if size == 0 {
            return Err(Error::InvalidSize(0));
        }

        let result = self.allocate_inner(size, numa_node);
        if result.is_err() {
            self.stats.allocate_failures.add(1);
        }
        result
    }

    fn allocate_inner(&self, size: usize, numa_node: usize) -> Result<Block<C>> {
        if size <= TINY_LIMIT {
            let idx = tiny_index(size).min(self.tiny_heaps.len() - 1);
            self.tiny_heaps[idx].allocate(numa_node)
        } else if size <= self.max_size {
            let block_size = tiered_block_size(size);
            let base = (SMALL_LIMIT / 4).trailing_zeros();
            let idx = (block_size.trailing_zeros() - base) as usize;
            self.heaps[idx].allocate(numa_node)
        } else {
            let key = size.next_power_of_two();
            let heap = {
                let mut huge = self.huge_heaps.lock();
                huge.entry(key)
                    .or_insert_with(|| {
                        self.stats.huge_heaps_created.add(1);
                        Arc::new(FixedSizeHeap::new(
                            Arc::clone(&self.context),
                            key,
                            key,
                            self.never_free,
                            self.num_numa_nodes,
                            Arc::clone(&self.stats),
                        ))
                    })
                    .clone()
            };
            heap.allocate(numa_node)
        }
    }

    pub fn free(&self, block: Block<C>) {
        block.release();
    }

    /// Returns an owning wrapper that releases the block on drop unless
    /// moved-from. See [`UniqueBlock`].
    pub fn allocate_unique(&self, size: usize, numa_node: usize) -> Result<UniqueBlock<C>> {
        self.allocate(size, numa_node).map(UniqueBlock::new)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// RAII wrapper around a [`Block`] that releases it on drop. Mirrors
/// `hwmalloc::heap<Context>::allocate_unique`'s `unique_block`; Rust's move
/// semantics give us "moving transfers the release obligation" for free —
/// there is no observable moved-from state to check, since a moved
/// `UniqueBlock` simply stops existing at the move site.
pub struct UniqueBlock<C: Backend<Cpu>> {
    block: Block<C>,
}

impl<C: Backend<Cpu>> UniqueBlock<C> {
    fn new(block: Block<C>) -> Self {
        UniqueBlock { block }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.block.ptr
    }

    pub fn handle(&self) -> <C::Region as crate::register::Region>::Handle {
        self.block.handle
    }

    pub fn block(&self) -> &Block<C> {
        &self.block
    }
}

impl<C: Backend<Cpu>> Drop for UniqueBlock<C> {
    fn drop(&mut self) {
        let block = core::mem::replace(&mut self.block, Block::default());
        block.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;

    #[test]
    fn construction_and_round_trip() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        let b = heap.allocate(1, 0).expect("allocate should succeed");
        heap.free(b);
    }

    #[test]
    fn tiny_sizes_route_to_the_tiny_tier() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        assert_eq!(tiny_index(8), 0);
        assert_eq!(tiny_index(100), 12);
        let b = heap.allocate(100, 0).unwrap();
        heap.free(b);
    }

    #[test]
    fn large_sizes_route_past_the_small_tier() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        let b = heap.allocate(1025, 0).unwrap();
        heap.free(b);
    }

    #[test]
    fn oversize_requests_dedupe_into_one_huge_heap() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        let key = heap.max_size() + 1;

        let a = heap.allocate(key, 0).unwrap();
        let b = heap.allocate(key, 0).unwrap();
        assert_eq!(heap.huge_heaps.lock().len(), 1);
        heap.free(a);
        heap.free(b);
    }

    #[test]
    fn zero_size_is_rejected() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        match heap.allocate(0, 0) {
            Err(Error::InvalidSize(0)) => {}
            other => panic!("expected InvalidSize(0), got {other:?}"),
        }
    }

    #[test]
    fn allocate_unique_releases_exactly_once_on_drop() {
        let heap = TieredHeap::with_numa_nodes(MockContext::default(), Config::default(), 1);
        {
            let _u = heap.allocate_unique(64, 0).unwrap();
        }
        let stats = heap.stats();
        assert_eq!(stats.segments.allocated, 1);
    }
}
