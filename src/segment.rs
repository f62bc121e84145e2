//! A segment: one registered NUMA allocation sliced into equal-size blocks,
//! with a lock-free per-segment free-block stack.
//!
//! Grounded on `hwmalloc::detail::segment` (`original_source/include/hwmalloc/detail/segment.hpp`):
//! same constructor shape (pool back-pointer, region, allocation, block
//! size, output stack), same `free`/`collect`/`is_empty` operations, same
//! field-order-determines-destruction-order trick for "region first, then
//! allocation" (there: explicit member order; here: Rust's declared-field
//! drop order).

use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::block::Block;
use crate::domain::Cpu;
use crate::numa;
use crate::pool::Pool;
use crate::register::{Backend, Region, RegistrationBackend};
use crate::sink::BlockSink;

#[cfg(feature = "device")]
use crate::device::DeviceAllocation;
#[cfg(feature = "device")]
use crate::register::DeviceRegistrationBackend;

/// Releases a NUMA allocation when dropped. Declaring this field after the
/// registration `region` field in [`Segment`] guarantees deregistration
/// happens before the backing pages are returned to the OS.
struct AllocationHolder(Option<numa::Allocation>);

impl Drop for AllocationHolder {
    fn drop(&mut self) {
        if let Some(alloc) = self.0.take() {
            numa::free(alloc);
        }
    }
}

#[cfg(feature = "device")]
struct DeviceAllocationHolder(Option<DeviceAllocation>, Option<std::sync::Arc<dyn crate::device::DeviceFacility>>);

#[cfg(feature = "device")]
impl Drop for DeviceAllocationHolder {
    fn drop(&mut self) {
        if let (Some(alloc), Some(facility)) = (self.0.take(), self.1.take()) {
            facility.free(alloc);
        }
    }
}

pub struct Segment<C: Backend<Cpu>> {
    pool: *const Pool<C>,
    block_size: usize,
    num_blocks: usize,
    numa_node: usize,
    // Declaration order is destruction order: region deregisters, then the
    // host allocation is released, then (if present) the device region and
    // device allocation follow the same pattern.
    region: C::Region,
    allocation: AllocationHolder,
    #[cfg(feature = "device")]
    device_region: Option<<C as DeviceRegistrationBackend<Cpu>>::DeviceRegion>,
    #[cfg(feature = "device")]
    device_allocation: DeviceAllocationHolder,
    freed_stack: ArrayQueue<Block<C>>,
    num_freed: AtomicUsize,
}

impl<C: Backend<Cpu>> Segment<C> {
    /// Builds a segment's bookkeeping state. The block records themselves
    /// are created by [`Segment::populate`], called once the segment has a
    /// stable heap address (it must be boxed first — blocks store a raw
    /// back-pointer to `self`, which would dangle if the segment moved).
    pub(crate) fn new(
        pool: *const Pool<C>,
        region: C::Region,
        allocation: numa::Allocation,
        block_size: usize,
    ) -> Self {
        debug_assert!(block_size > 0);
        let numa_node = allocation.node;
        let num_blocks = (allocation.size / block_size).max(1);
        Segment {
            pool,
            block_size,
            num_blocks,
            numa_node,
            region,
            allocation: AllocationHolder(Some(allocation)),
            #[cfg(feature = "device")]
            device_region: None,
            #[cfg(feature = "device")]
            device_allocation: DeviceAllocationHolder(None, None),
            freed_stack: ArrayQueue::new(num_blocks),
            num_freed: AtomicUsize::new(0),
        }
    }

    /// Slices the backing allocation into `capacity()` blocks and pushes
    /// each onto `out_stack`, retrying on transient push failure (the stack
    /// is bounded but pre-sized to fit every block exactly once).
    pub(crate) fn populate<S: BlockSink<C>>(&self, out_stack: &S) {
        let origin = self.base_ptr();
        for i in (0..self.num_blocks).rev() {
            let offset = i * self.block_size;
            let block = Block {
                segment: self as *const Segment<C>,
                ptr: unsafe { origin.add(offset) },
                handle: self.region.get_handle(offset, self.block_size),
                ..Default::default()
            };
            out_stack.push_block(block);
        }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.allocation.0.as_ref().expect("allocation present while segment is alive").ptr
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.num_blocks
    }

    pub fn numa_node(&self) -> usize {
        self.numa_node
    }

    pub fn get_pool(&self) -> *const Pool<C> {
        self.pool
    }

    /// `true` iff every block from this segment has been freed back to it
    /// and none remain outstanding.
    pub fn is_empty(&self) -> bool {
        self.num_freed.load(Ordering::Acquire) == self.num_blocks
    }

    /// Pushes a freed block onto this segment's freed-stack, then
    /// release-increments the freed count. Any thread later observing
    /// `is_empty()` is guaranteed (by the release/acquire pair) to also
    /// observe every block now sitting in the freed-stack.
    pub(crate) fn free(&self, block: Block<C>) {
        self.freed_stack.push_block(block);
        self.num_freed.fetch_add(1, Ordering::Release);
    }

    /// Drains this segment's freed-stack into `out_stack`, decrements the
    /// freed count by the number drained, and returns that count. Must be
    /// called by exactly one thread at a time (the owning pool's
    /// collector); concurrent collection across *different* segments is
    /// fine.
    pub(crate) fn collect<S: BlockSink<C>>(&self, out_stack: &S) -> usize {
        let mut drained = 0usize;
        while let Some(block) = self.freed_stack.pop() {
            out_stack.push_block(block);
            drained += 1;
        }
        if drained > 0 {
            self.num_freed.fetch_sub(drained, Ordering::AcqRel);
        }
        drained
    }

    #[cfg(feature = "device")]
    pub(crate) fn attach_device(
        &mut self,
        device_region: <C as DeviceRegistrationBackend<Cpu>>::DeviceRegion,
        device_allocation: DeviceAllocation,
        facility: std::sync::Arc<dyn crate::device::DeviceFacility>,
    ) {
        self.device_region = Some(device_region);
        self.device_allocation = DeviceAllocationHolder(Some(device_allocation), Some(facility));
    }
}

// SAFETY: a Segment is accessed only through shared references once
// published (construction finishes before any `&Segment` escapes); its
// interior mutability is all atomics / lock-free structures.
unsafe impl<C: Backend<Cpu>> Send for Segment<C> where C::Region: Send {}
unsafe impl<C: Backend<Cpu>> Sync for Segment<C> where C::Region: Sync {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockContext;
    use std::ptr;

    #[test]
    fn construction_drains_and_collects() {
        let ctx = MockContext::default();
        let alloc = numa::allocate(numa::page_size(), 0).unwrap();
        let region = ctx.register_memory(alloc.ptr, alloc.size).unwrap();
        let block_size = core::mem::size_of::<i32>();

        let segment = Box::new(Segment::new(ptr::null(), region, alloc, block_size));
        let drain = ArrayQueue::new(segment.capacity());
        segment.populate(&drain);

        let mut seen = 0;
        while let Some(block) = drain.pop() {
            segment.free(block);
            seen += 1;
        }
        assert_eq!(seen, segment.capacity());
        assert!(segment.is_empty());

        let collected = segment.collect(&drain);
        assert_eq!(collected, segment.capacity());
    }
}
