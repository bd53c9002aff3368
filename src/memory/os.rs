//! Thin wrappers around the POSIX mapping calls.
//!
//! Every function returns the raw `errno` as an [`std::io::Error`]; translation into the
//! Win32 error model happens in the engine, where the operation context is known.

use std::{
    ffi::c_void,
    io::{Error, Result},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Returns the host page size.
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);
    let size = PAGE_SIZE.load(Ordering::Relaxed);
    if size != 0 {
        return size;
    }

    // SAFETY: sysconf has no preconditions.
    let size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        value if value > 0 => value as usize,
        _ => 4096,
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RESERVE_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

#[cfg(any(target_os = "linux", target_os = "android"))]
const LARGE_PAGE_FLAGS: libc::c_int = libc::MAP_HUGETLB;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const LARGE_PAGE_FLAGS: libc::c_int = 0;

/// Maps `len` bytes of inaccessible anonymous memory.
///
/// With a non-null `hint` the kernel must place the mapping exactly there; a mapping at any
/// other address is undone and reported as `EADDRINUSE`.
pub(crate) fn reserve(hint: usize, len: usize, large_pages: bool) -> Result<usize> {
    let flags = if large_pages {
        RESERVE_FLAGS | LARGE_PAGE_FLAGS
    } else {
        RESERVE_FLAGS
    };

    // SAFETY: a fresh anonymous mapping without MAP_FIXED cannot clobber existing mappings.
    let address = unsafe { libc::mmap(hint as *mut c_void, len, libc::PROT_NONE, flags, -1, 0) };
    if address == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }

    if hint != 0 && address as usize != hint {
        // SAFETY: `address` was just returned by mmap for `len` bytes.
        unsafe { libc::munmap(address, len) };
        return Err(Error::from_raw_os_error(libc::EADDRINUSE));
    }

    exclude_from_dump(address as usize, len);
    Ok(address as usize)
}

/// Replaces `[address, address + len)` with a fresh inaccessible anonymous mapping.
///
/// Any backing pages are returned to the kernel; a later commit sees zero-filled memory.
///
/// # Safety
///
/// The range must lie entirely inside a mapping owned by the caller.
pub(crate) unsafe fn discard(address: usize, len: usize) -> Result<()> {
    let result = unsafe {
        libc::mmap(
            address as *mut c_void,
            len,
            libc::PROT_NONE,
            RESERVE_FLAGS | libc::MAP_FIXED,
            -1,
            0,
        )
    };
    if result == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    exclude_from_dump(address, len);
    Ok(())
}

/// Changes the protection of `[address, address + len)`.
///
/// # Safety
///
/// The range must lie entirely inside a mapping owned by the caller, and no live Rust reference
/// may point into it when access is being reduced.
pub(crate) unsafe fn protect(address: usize, len: usize, prot: libc::c_int) -> Result<()> {
    if unsafe { libc::mprotect(address as *mut c_void, len, prot) } != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Unmaps `[address, address + len)`.
///
/// # Safety
///
/// The range must be a mapping owned by the caller that nothing references anymore.
pub(crate) unsafe fn unmap(address: usize, len: usize) -> Result<()> {
    if unsafe { libc::munmap(address as *mut c_void, len) } != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Tells the kernel the contents of `[address, address + len)` are no longer needed.
///
/// # Safety
///
/// The range must lie inside a private anonymous mapping owned by the caller.
pub(crate) unsafe fn reset(address: usize, len: usize) -> Result<()> {
    let status =
        unsafe { libc::posix_madvise(address as *mut c_void, len, libc::POSIX_MADV_DONTNEED) };
    if status != 0 {
        return Err(Error::from_raw_os_error(status));
    }
    Ok(())
}

/// Marks committed pages for inclusion in core dumps again.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn include_in_dump(address: usize, len: usize) {
    // SAFETY: MADV_DODUMP only changes dump bookkeeping.
    unsafe { libc::madvise(address as *mut c_void, len, libc::MADV_DODUMP) };
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn include_in_dump(_address: usize, _len: usize) {}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn exclude_from_dump(address: usize, len: usize) {
    // SAFETY: MADV_DONTDUMP only changes dump bookkeeping.
    unsafe { libc::madvise(address as *mut c_void, len, libc::MADV_DONTDUMP) };
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn exclude_from_dump(_address: usize, _len: usize) {}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
pub(crate) fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Rounds `value` up to a multiple of `align` (a power of two), or `None` on overflow.
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}
