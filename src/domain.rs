//! Memory-domain tags.
//!
//! A memory domain distinguishes host memory from device memory classes at
//! the type level. `hw_ptr<T, M>`/`hw_vptr<M>` in the original C++ carry the
//! domain both as a type parameter (so pointers of different domains are
//! distinct types) and as a runtime integer (so equality and null-checks
//! don't need to know the type). We mirror both.

/// Compile-time marker for the host ("cpu") memory domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cpu;

/// Compile-time marker for the device memory domain. Only meaningful when
/// the `device` feature is enabled, but kept unconditionally so that code
/// which is generic over a domain marker doesn't need to be feature-gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dev;

/// Runtime tag stored inside a type-erased pointer. `-1` means "null / no
/// domain", matching the C++ `m_memory_domain = -1` default.
pub type DomainId = i32;

/// A compile-time memory-domain marker knows its own runtime id.
pub trait MemoryDomain: Copy + Default + 'static {
    const ID: DomainId;
}

impl MemoryDomain for Cpu {
    const ID: DomainId = 0;
}

impl MemoryDomain for Dev {
    const ID: DomainId = 1;
}
