//! The NUMA facility: page allocation on a given locality node.
//!
//! Grounded on `os.rs`'s alignment helpers and platform-gated
//! `mmap`/`VirtualAlloc` calls, using raw `libc` calls rather than a
//! `libnuma` binding crate, consistent with how NUMA allocation is handled
//! elsewhere in this codebase's lineage.

use log::warn;

use crate::error::{Error, Result};

/// One NUMA-backed allocation: base pointer, size in bytes, and the node it
/// was (best-effort) placed on.
#[derive(Debug)]
pub struct Allocation {
    pub ptr: *mut u8,
    pub size: usize,
    pub node: usize,
}

// SAFETY: `Allocation` is a plain (ptr, size, node) tuple; the bytes it
// refers to are not aliased by the allocator itself once handed out.
unsafe impl Send for Allocation {}

fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

/// Page size of the current platform. Cached after first call in callers
/// that hot-path it; this function itself is cheap.
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if n > 0 {
            n as usize
        } else {
            4096
        }
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

/// Allocates `size` bytes (rounded up to a page boundary) on NUMA node
/// `node`, zero-initialized, page-aligned.
pub fn allocate(size: usize, node: usize) -> Result<Allocation> {
    let page = page_size();
    let rounded = align_up(size.max(1), page);

    #[cfg(target_os = "linux")]
    {
        allocate_linux(rounded, node)
    }
    #[cfg(windows)]
    {
        allocate_windows(rounded, node)
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        allocate_fallback(rounded, node)
    }
}

/// Number of NUMA nodes visible to this process, used to size the vector of
/// per-node pools in [`crate::fixed_heap::FixedSizeHeap`]. Falls back to 1
/// wherever node-local sysfs data isn't available, same as the other
/// platform-gated fallbacks in this module.
#[cfg(target_os = "linux")]
pub fn node_count() -> usize {
    for node in 0.. {
        let path = format!("/sys/devices/system/node/node{node}");
        if std::fs::metadata(&path).is_err() {
            return node.max(1);
        }
    }
    unreachable!()
}

#[cfg(not(target_os = "linux"))]
pub fn node_count() -> usize {
    1
}

pub fn free(alloc: Allocation) {
    if alloc.ptr.is_null() {
        return;
    }
    #[cfg(unix)]
    unsafe {
        libc::munmap(alloc.ptr as *mut libc::c_void, alloc.size);
    }
    #[cfg(windows)]
    unsafe {
        winapi::um::memoryapi::VirtualFree(alloc.ptr as _, 0, winapi::um::winnt::MEM_RELEASE);
    }
    #[cfg(not(any(unix, windows)))]
    unsafe {
        let layout = std::alloc::Layout::from_size_align_unchecked(alloc.size, page_size());
        std::alloc::dealloc(alloc.ptr, layout);
    }
}

#[cfg(target_os = "linux")]
fn allocate_linux(size: usize, node: usize) -> Result<Allocation> {
    // MPOL_BIND policy, from <linux/mempolicy.h>; not exposed by `libc`.
    const MPOL_BIND: libc::c_ulong = 2;
    const MPOL_MF_STRICT: libc::c_ulong = 1;
    const MPOL_MF_MOVE: libc::c_ulong = 1 << 1;

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        warn!("numa: mmap({size}) failed on node {node}");
        return Err(Error::OutOfHostMemory { requested: size, node });
    }

    // Best-effort node binding: a single-bit mask with bit `node` set.
    let nodemask: libc::c_ulong = 1u64.checked_shl(node as u32).unwrap_or(0) as libc::c_ulong;
    let maxnode = (core::mem::size_of::<libc::c_ulong>() * 8) as libc::c_ulong;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            addr,
            size as libc::c_ulong,
            MPOL_BIND,
            &nodemask as *const libc::c_ulong,
            maxnode + 1,
            MPOL_MF_STRICT | MPOL_MF_MOVE,
        )
    };
    if ret != 0 {
        // Binding is an optimization hint; failure to pin to the requested
        // node does not make the pages unusable.
        warn!("numa: mbind to node {node} failed, memory stays unbound");
    }

    Ok(Allocation { ptr: addr as *mut u8, size, node })
}

#[cfg(windows)]
fn allocate_windows(size: usize, node: usize) -> Result<Allocation> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE};

    if node != 0 {
        warn!("numa: node-specific allocation is unsupported on this platform, ignoring node {node}");
    }
    // MEM_COMMIT zero-fills newly committed private pages, matching the
    // zero-initialization this function promises on every platform.
    let ptr = unsafe {
        VirtualAlloc(std::ptr::null_mut(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
    } as *mut u8;
    if ptr.is_null() {
        return Err(Error::OutOfHostMemory { requested: size, node });
    }
    Ok(Allocation { ptr, size, node: 0 })
}

#[cfg(not(any(target_os = "linux", windows)))]
fn allocate_fallback(size: usize, node: usize) -> Result<Allocation> {
    if node != 0 {
        warn!("numa: node-specific allocation is unsupported on this platform, ignoring node {node}");
    }
    let layout = match std::alloc::Layout::from_size_align(size, page_size()) {
        Ok(l) => l,
        Err(_) => return Err(Error::OutOfHostMemory { requested: size, node }),
    };
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(Error::OutOfHostMemory { requested: size, node });
    }
    Ok(Allocation { ptr, size, node: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_roundtrip() {
        let a = allocate(1, 0).expect("allocation should succeed");
        assert!(!a.ptr.is_null());
        assert!(a.size >= 1);
        unsafe {
            std::ptr::write_bytes(a.ptr, 0xAB, a.size);
        }
        free(a);
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn node_count_is_at_least_one() {
        assert!(node_count() >= 1);
    }
}
