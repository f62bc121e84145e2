//! `rmapool`: a hardware-aware, NUMA-aware memory allocator for zero-copy
//! RMA/DMA buffers.
//!
//! An allocation request is routed by size to a fixed-size pool (tiny,
//! small, large, or an on-demand "huge" tier), which in turn owns per-NUMA-node
//! segments of externally-registered memory. See [`heap::TieredHeap`] for the
//! entry point and [`register::RegistrationBackend`] for the capability a
//! caller must supply to back allocations with real, registered memory.

pub mod block;
pub mod device;
pub mod domain;
pub mod error;
pub mod fixed_heap;
pub mod heap;
pub mod numa;
pub mod pool;
pub mod ptr;
pub mod register;
mod segment;
mod sink;
pub mod stats;

#[cfg(test)]
mod mock;

pub use block::Block;
pub use domain::{Cpu, Dev, DomainId, MemoryDomain};
pub use error::{Error, Result};
pub use heap::{Config, TieredHeap, UniqueBlock};
pub use ptr::{HwPtr, VoidPtr};
pub use register::{Backend, Handle, Region, RegistrationBackend};
pub use stats::StatsSnapshot;

#[cfg(feature = "device")]
pub use device::{DeviceAllocation, DeviceFacility};
#[cfg(feature = "device")]
pub use register::DeviceRegistrationBackend;
