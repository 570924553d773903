//! Anonymous virtual memory for the bump-pointer memory reservation.
//!
//! Used only when `Config::prealloc` is set: the heap reserves the whole
//! memory limit up front as one anonymous mapping and bump-allocates slab
//! pages out of it. On-demand (non-prealloc) growth instead goes through
//! [`crate::pmem::Pool`], which is file-backed. This module is Linux-only —
//! unlike the teacher crate, which also supports Windows, the persistent
//! store this core targets only exists on Linux, so there is no ambient
//! reason to carry a windows backend.

use std::io;

/// Allocate `size` bytes of anonymous, zero-initialized virtual memory.
///
/// # Safety
/// Caller must eventually call `page_dealloc` with the returned pointer and
/// the same `size`.
pub unsafe fn page_alloc(size: usize) -> io::Result<*mut u8> {
    let raw = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(raw as *mut u8)
}

/// Free virtual memory previously allocated by `page_alloc`.
///
/// # Safety
/// `ptr` must have been returned by `page_alloc`, and `size` must match the
/// original allocation size.
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe {
        libc::munmap(ptr as *mut libc::c_void, size);
    }
}
