//! A small abstraction over "a lock-free structure you can push freed
//! blocks onto", so [`crate::segment::Segment`] can be populated/collected
//! into either a segment's own bounded freed-stack or a pool's unbounded
//! main freelist without duplicating the retry loop.

use crossbeam_queue::{ArrayQueue, SegQueue};
use crossbeam_utils::Backoff;

use crate::block::Block;
use crate::domain::Cpu;
use crate::register::Backend;

pub(crate) trait BlockSink<C: Backend<Cpu>> {
    fn push_block(&self, block: Block<C>);
}

/// Bounded (per-segment freed-stack): pre-sized to fit every block the
/// segment owns, so a push failure is only ever transient contention.
impl<C: Backend<Cpu>> BlockSink<C> for ArrayQueue<Block<C>> {
    fn push_block(&self, block: Block<C>) {
        let backoff = Backoff::new();
        let mut b = block;
        while let Err(returned) = self.push(b) {
            b = returned;
            backoff.snooze();
        }
    }
}

/// Unbounded (pool main freelist): grows with the pool's segment count
/// rather than being pre-sized to a fixed capacity.
impl<C: Backend<Cpu>> BlockSink<C> for SegQueue<Block<C>> {
    fn push_block(&self, block: Block<C>) {
        self.push(block);
    }
}
