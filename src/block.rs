//! The block record: the unit returned to callers.

use crate::register::{Backend, Region, RegistrationBackend};
use crate::segment::Segment;
use crate::domain::Cpu;

#[cfg(feature = "device")]
use crate::register::DeviceRegistrationBackend;

/// A single allocatable unit. Carries a back-reference to its owning
/// segment (null for externally-registered user memory), a raw address,
/// and a registration handle.
///
/// Two blocks that compare equal by address refer to the same underlying
/// byte range and must be freed at most once — this type does not enforce
/// that on its own (same as the source); callers must not double-free.
pub struct Block<C: Backend<Cpu>> {
    pub(crate) segment: *const Segment<C>,
    pub ptr: *mut u8,
    pub handle: <C::Region as Region>::Handle,
    #[cfg(feature = "device")]
    pub device_ptr: *mut u8,
    #[cfg(feature = "device")]
    pub device_handle: <<C as DeviceRegistrationBackend<Cpu>>::DeviceRegion as Region>::Handle,
    #[cfg(feature = "device")]
    pub device_ordinal: u32,
}

impl<C: Backend<Cpu>> Block<C> {
    pub fn on_device(&self) -> bool {
        #[cfg(feature = "device")]
        {
            !self.device_ptr.is_null()
        }
        #[cfg(not(feature = "device"))]
        {
            false
        }
    }

    pub fn is_user_registered(&self) -> bool {
        self.segment.is_null()
    }

    /// Releases the block back to its owning pool. A no-op for
    /// user-registered memory (null `segment`).
    pub fn release(self) {
        if !self.segment.is_null() {
            // SAFETY: segments are arena-owned by their pool and never moved
            // or dropped while any outstanding block still references them
            // (the pool only destroys a segment once `is_empty()` holds).
            unsafe { (*self.segment).free(self) }
        }
    }
}

impl<C: Backend<Cpu>> Clone for Block<C> {
    fn clone(&self) -> Self {
        Self {
            segment: self.segment,
            ptr: self.ptr,
            handle: self.handle,
            #[cfg(feature = "device")]
            device_ptr: self.device_ptr,
            #[cfg(feature = "device")]
            device_handle: self.device_handle,
            #[cfg(feature = "device")]
            device_ordinal: self.device_ordinal,
        }
    }
}
impl<C: Backend<Cpu>> Copy for Block<C> {}

impl<C: Backend<Cpu>> PartialEq for Block<C> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<C: Backend<Cpu>> Eq for Block<C> {}

impl<C: Backend<Cpu>> Default for Block<C> {
    fn default() -> Self {
        Self {
            segment: core::ptr::null(),
            ptr: core::ptr::null_mut(),
            handle: Default::default(),
            #[cfg(feature = "device")]
            device_ptr: core::ptr::null_mut(),
            #[cfg(feature = "device")]
            device_handle: Default::default(),
            #[cfg(feature = "device")]
            device_ordinal: 0,
        }
    }
}

// SAFETY: a Block is a plain bag of addresses and a Copy handle; it carries
// no borrow, and is designed to move between the thread that freed it and
// the collector that drains it.
unsafe impl<C: Backend<Cpu>> Send for Block<C> {}
unsafe impl<C: Backend<Cpu>> Sync for Block<C> {}
