//! The page provider
//!
//! Maps anonymous pages straight from the OS and hands them back untracked.
//! Everything the allocator manages lives inside regions acquired here, which is
//! what keeps the allocator from ever having to call itself.

use log::warn;

/// Acquires a zeroed, page-aligned, writable region of at least `len` bytes
///
/// Returns null if the OS refuses the mapping.
pub(crate) fn acquire(len: usize) -> *mut u8 {
    if len == 0 {
        return std::ptr::null_mut();
    }

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return std::ptr::null_mut();
    }

    ptr as *mut u8
}

/// Returns a region previously handed out by [`acquire`]
///
/// Release is best effort: a failing unmap leaves the pages in place, which
/// wastes memory but breaks nothing.
///
/// # Safety
/// `ptr` and `len` must describe exactly one region previously returned by
/// [`acquire`] that has not been released yet.
pub(crate) unsafe fn release(ptr: *mut u8, len: usize) {
    if ptr.is_null() || len == 0 {
        return;
    }

    if unsafe { libc::munmap(ptr as *mut libc::c_void, len) } == -1 {
        warn!(
            "munmap failed: {}, addr {:p}, size {}",
            errno::errno(),
            ptr,
            len
        );
    }
}
