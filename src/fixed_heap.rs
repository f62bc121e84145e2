//! The fixed-size heap: one [`Pool`] per NUMA node, all for a single block
//! size.

use std::sync::Arc;

use crate::block::Block;
use crate::domain::Cpu;
use crate::error::Result;
use crate::pool::Pool;
use crate::register::Backend;
use crate::stats::Stats;

pub struct FixedSizeHeap<C: Backend<Cpu>> {
    pools: Vec<Box<Pool<C>>>,
    block_size: usize,
}

impl<C: Backend<Cpu>> FixedSizeHeap<C> {
    pub fn new(
        context: Arc<C>,
        block_size: usize,
        segment_size: usize,
        never_free: bool,
        num_numa_nodes: usize,
        stats: Arc<Stats>,
    ) -> Self {
        let num_numa_nodes = num_numa_nodes.max(1);
        let pools = (0..num_numa_nodes)
            .map(|node| {
                Box::new(Pool::new(
                    Arc::clone(&context),
                    block_size,
                    segment_size,
                    node,
                    never_free,
                    Arc::clone(&stats),
                ))
            })
            .collect();
        FixedSizeHeap { pools, block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Forwards to `m_pools[numa_node].allocate()`. Out-of-range nodes clamp
    /// to the last pool rather than panicking, since the caller-supplied
    /// node id may exceed what this process observed at startup.
    pub fn allocate(&self, numa_node: usize) -> Result<Block<C>> {
        let idx = numa_node.min(self.pools.len() - 1);
        self.pools[idx].allocate()
    }

    /// Not consulted on free: the block reaches its originating pool via
    /// the segment back-pointer.
    pub fn free(&self, block: Block<C>) {
        block.release();
    }

    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;
    use crate::numa;

    #[test]
    fn allocate_free_loop_across_one_node() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let heap = FixedSizeHeap::new(ctx, 8, numa::page_size(), false, 1, stats);

        for i in 0..512u32 {
            let b = heap.allocate(0).expect("allocate should succeed");
            if i % 2 == 0 {
                heap.free(b);
            }
        }
        let b = heap.allocate(0).expect("allocate should succeed");
        heap.free(b);
    }

    #[test]
    fn out_of_range_numa_node_clamps_to_last_pool() {
        let ctx = Arc::new(MockContext::default());
        let stats = Arc::new(Stats::default());
        let heap = FixedSizeHeap::new(ctx, 8, numa::page_size(), false, 2, stats);
        assert_eq!(heap.num_pools(), 2);

        let b = heap.allocate(999).expect("allocate should clamp, not panic");
        heap.free(b);
    }
}
