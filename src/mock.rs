//! A minimal in-process [`RegistrationBackend`] for tests, standing in for
//! a real RMA context. Mirrors `test_segment.cpp`'s `struct context`: a
//! `region` that records whether it was dropped, and a `handle_type` that's
//! just the pointer offset.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::Cpu;
use crate::error::Error;
use crate::register::{Handle, Region, RegistrationBackend};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MockHandle {
    pub ptr: usize,
}

impl Handle for MockHandle {
    fn local_key(&self) -> u64 {
        self.ptr as u64
    }
    fn remote_key(&self) -> u64 {
        self.ptr as u64
    }
}

/// Counts live registrations so tests can assert a region deregisters
/// exactly once, same as `test_segment.cpp`'s "region destructor" print.
pub(crate) struct MockRegion {
    base: usize,
    live_count: Arc<AtomicUsize>,
}

impl Region for MockRegion {
    type Handle = MockHandle;

    fn get_handle(&self, offset: usize, _size: usize) -> MockHandle {
        MockHandle { ptr: self.base + offset }
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        self.live_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockContext {
    pub live_regions: Arc<AtomicUsize>,
}

impl RegistrationBackend<Cpu> for MockContext {
    type Region = MockRegion;

    fn register_memory(&self, ptr: *mut u8, _size: usize) -> Result<MockRegion, Error> {
        self.live_regions.fetch_add(1, Ordering::SeqCst);
        Ok(MockRegion { base: ptr as usize, live_count: Arc::clone(&self.live_regions) })
    }
}
