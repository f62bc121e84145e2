//! The Context capability: the external registration backend this
//! allocator is generic over. `register_memory(C&, ptr, size, tag) -> R` in
//! the source is found by argument-dependent lookup; Rust has no ADL, so
//! it's modeled here as a trait on the context type instead.

use crate::domain::MemoryDomain;
use crate::error::Error;

/// An RMA/DMA key pair as returned by the external context, opaque to this
/// crate beyond being copyable and exposing local/remote keys.
pub trait Handle: Copy + Default + Send + Sync + 'static {
    fn local_key(&self) -> u64;
    fn remote_key(&self) -> u64;
}

/// One registration: a region of memory known to the Context. Dropping it
/// deregisters, mirroring the C++ region destructor.
pub trait Region: Send + Sync {
    type Handle: Handle;

    /// Returns the RMA handle for the sub-range `[offset, offset + size)` of
    /// this region.
    fn get_handle(&self, offset: usize, size: usize) -> Self::Handle;
}

/// The registration capability a Context must provide for host memory.
///
/// Implementors register a raw, already-allocated byte range and return a
/// `Region`; the region's `Drop` impl is expected to deregister.
pub trait RegistrationBackend<M: MemoryDomain> {
    type Region: Region;

    fn register_memory(&self, ptr: *mut u8, size: usize) -> Result<Self::Region, Error>;
}

/// Device-memory registration, only required when the `device` feature is
/// enabled. Kept as a separate trait (rather than folding into
/// `RegistrationBackend`) so host-only contexts don't need to implement it.
#[cfg(feature = "device")]
pub trait DeviceRegistrationBackend<M: MemoryDomain>: RegistrationBackend<M> {
    type DeviceRegion: Region;

    fn register_device_memory(
        &self,
        ptr: *mut u8,
        size: usize,
        device_ordinal: u32,
    ) -> Result<Self::DeviceRegion, Error>;
}

/// The bound every generic allocator type in this crate actually carries on
/// its context parameter. Without the `device` feature this is exactly
/// `RegistrationBackend<M>`; with it, it additionally requires
/// `DeviceRegistrationBackend<M>`, so the device-only fields on
/// [`crate::block::Block`] and [`crate::segment::Segment`] (which project
/// `DeviceRegistrationBackend::DeviceRegion`) stay well-formed under either
/// feature configuration without the struct definitions themselves needing
/// to branch on the feature.
#[cfg(not(feature = "device"))]
pub trait Backend<M: MemoryDomain>: RegistrationBackend<M> {}
#[cfg(not(feature = "device"))]
impl<M: MemoryDomain, C: RegistrationBackend<M>> Backend<M> for C {}

#[cfg(feature = "device")]
pub trait Backend<M: MemoryDomain>: DeviceRegistrationBackend<M> {}
#[cfg(feature = "device")]
impl<M: MemoryDomain, C: DeviceRegistrationBackend<M>> Backend<M> for C {}
