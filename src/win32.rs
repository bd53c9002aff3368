//! Win32-shaped entry points over the process-wide [`Pal`].
//!
//! These functions keep the calling convention of the Windows API: flags are raw `u32` values,
//! and failure is reported by a sentinel return value (null, `false`, 0 or
//! [`TLS_OUT_OF_INDEXES`]) plus an error code stored in the calling thread's error state,
//! retrievable with [`get_last_error`](crate::get_last_error). Successful calls leave the error
//! state alone unless noted otherwise.
//!
//! # Example
//!
//! ```rust
//! use dotpal::{get_last_error, win32, ErrorCode};
//!
//! let block = win32::virtual_alloc(
//!     std::ptr::null_mut(),
//!     0x1000,
//!     win32::MEM_RESERVE | win32::MEM_COMMIT,
//!     win32::PAGE_READWRITE,
//! );
//! assert!(!block.is_null());
//!
//! assert!(!win32::virtual_free(block, 0x1000, win32::MEM_RELEASE));
//! assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);
//! assert!(win32::virtual_free(block, 0, win32::MEM_RELEASE));
//! ```

use std::ptr::{self, NonNull};

use crate::{
    environment::EnvLookup,
    heap::{Heap, HeapFlags},
    memory::{AllocationType, FreeType, MemoryBasicInformation, Protection},
    tls::TlsIndex,
    Error, Pal, Result,
};

/// `MEM_COMMIT`
pub const MEM_COMMIT: u32 = AllocationType::COMMIT.bits();
/// `MEM_RESERVE`
pub const MEM_RESERVE: u32 = AllocationType::RESERVE.bits();
/// `MEM_DECOMMIT`
pub const MEM_DECOMMIT: u32 = FreeType::DECOMMIT.bits();
/// `MEM_RELEASE`
pub const MEM_RELEASE: u32 = FreeType::RELEASE.bits();
/// `MEM_RESET`
pub const MEM_RESET: u32 = AllocationType::RESET.bits();
/// `MEM_TOP_DOWN`
pub const MEM_TOP_DOWN: u32 = AllocationType::TOP_DOWN.bits();
/// `MEM_WRITE_WATCH`
pub const MEM_WRITE_WATCH: u32 = AllocationType::WRITE_WATCH.bits();
/// `MEM_LARGE_PAGES`
pub const MEM_LARGE_PAGES: u32 = AllocationType::LARGE_PAGES.bits();
/// `MEM_RESERVE_EXECUTABLE`
pub const MEM_RESERVE_EXECUTABLE: u32 = AllocationType::RESERVE_EXECUTABLE.bits();

/// `PAGE_NOACCESS`
pub const PAGE_NOACCESS: u32 = Protection::NoAccess as u32;
/// `PAGE_READONLY`
pub const PAGE_READONLY: u32 = Protection::ReadOnly as u32;
/// `PAGE_READWRITE`
pub const PAGE_READWRITE: u32 = Protection::ReadWrite as u32;
/// `PAGE_EXECUTE`
pub const PAGE_EXECUTE: u32 = Protection::Execute as u32;
/// `PAGE_EXECUTE_READ`
pub const PAGE_EXECUTE_READ: u32 = Protection::ExecuteRead as u32;
/// `PAGE_EXECUTE_READWRITE`
pub const PAGE_EXECUTE_READWRITE: u32 = Protection::ExecuteReadWrite as u32;

/// `HEAP_NO_SERIALIZE`
pub const HEAP_NO_SERIALIZE: u32 = HeapFlags::NO_SERIALIZE.bits();
/// `HEAP_GENERATE_EXCEPTIONS`
pub const HEAP_GENERATE_EXCEPTIONS: u32 = HeapFlags::GENERATE_EXCEPTIONS.bits();
/// `HEAP_ZERO_MEMORY`
pub const HEAP_ZERO_MEMORY: u32 = HeapFlags::ZERO_MEMORY.bits();

/// Returned by [`tls_alloc`] when every index is in use.
pub const TLS_OUT_OF_INDEXES: u32 = 0xFFFF_FFFF;

fn allocation_type(bits: u32) -> Result<AllocationType> {
    AllocationType::from_bits(bits).ok_or(Error::InvalidParameter("unknown allocation type"))
}

fn protection(bits: u32) -> Result<Protection> {
    Protection::from_bits(bits).ok_or(Error::InvalidParameter("unknown page protection"))
}

fn free_type(bits: u32) -> Result<FreeType> {
    FreeType::from_bits(bits).ok_or(Error::InvalidParameter("unknown free type"))
}

fn heap_flags(bits: u32) -> Result<HeapFlags> {
    HeapFlags::from_bits(bits).ok_or(Error::InvalidParameter("unknown heap flags"))
}

/// `VirtualAlloc`: returns the base of the affected range, or null.
pub fn virtual_alloc(address: *mut u8, size: usize, allocation: u32, protect: u32) -> *mut u8 {
    let result = allocation_type(allocation).and_then(|allocation| {
        Pal::global()
            .virtual_memory()
            .alloc(address, size, allocation, protection(protect)?)
    });
    sentinel!(result, ptr::null_mut(), NonNull::as_ptr)
}

/// `VirtualFree`
pub fn virtual_free(address: *mut u8, size: usize, free: u32) -> bool {
    let result = free_type(free)
        .and_then(|free| Pal::global().virtual_memory().free(address, size, free));
    sentinel!(result, false, |()| true)
}

/// `VirtualProtect`: stores the previous protection of the first page in `old_protect`.
pub fn virtual_protect(address: *mut u8, size: usize, protect: u32, old_protect: &mut u32) -> bool {
    let result = protection(protect)
        .and_then(|protect| Pal::global().virtual_memory().protect(address, size, protect));
    sentinel!(result, false, |previous: Protection| {
        *old_protect = previous.bits();
        true
    })
}

/// `VirtualQuery`: fills `buffer` and returns the number of bytes written.
pub fn virtual_query(address: *const u8, buffer: &mut MemoryBasicInformation) -> usize {
    *buffer = Pal::global().virtual_memory().query(address);
    std::mem::size_of::<MemoryBasicInformation>()
}

/// `GetProcessHeap`
pub fn get_process_heap() -> &'static Heap {
    Pal::global().process_heap()
}

/// `HeapAlloc`: returns the new block, or null.
pub fn heap_alloc(heap: &Heap, flags: u32, size: usize) -> *mut u8 {
    let result = heap_flags(flags).and_then(|flags| heap.alloc(flags, size));
    sentinel!(result, ptr::null_mut(), NonNull::as_ptr)
}

/// `HeapFree`
pub fn heap_free(heap: &Heap, flags: u32, block: *mut u8) -> bool {
    let result = heap_flags(flags).and_then(|flags| heap.free(flags, block));
    sentinel!(result, false, |()| true)
}

/// `HeapReAlloc` with C-runtime semantics: a zero `size` frees `block` and returns null without
/// touching the error state.
pub fn heap_realloc(heap: &Heap, flags: u32, block: *mut u8, size: usize) -> *mut u8 {
    let result = heap_flags(flags).and_then(|flags| heap.realloc(flags, block, size));
    sentinel!(result, ptr::null_mut(), |resized: Option<NonNull<u8>>| {
        resized.map_or(ptr::null_mut(), NonNull::as_ptr)
    })
}

/// `HeapSize`: returns `usize::MAX` on failure.
pub fn heap_size(heap: &Heap, flags: u32, block: *const u8) -> usize {
    let result = heap_flags(flags).and_then(|_| heap.size(block));
    sentinel!(result, usize::MAX, |size| size)
}

/// `GetEnvironmentVariableA`
///
/// Returns the value length without the terminator when it fit into `buffer`, and 0 if the
/// variable is not defined. When it did not fit, returns the required size including the
/// terminator and sets [`ErrorCode::INSUFFICIENT_BUFFER`](crate::ErrorCode::INSUFFICIENT_BUFFER).
pub fn get_environment_variable(name: &str, buffer: &mut [u8]) -> u32 {
    let result = Pal::global()
        .environment()
        .get_environment_variable(name, buffer);
    sentinel!(result, 0, lookup_length)
}

/// `GetEnvironmentVariableW`, with sizes in UTF-16 code units.
pub fn get_environment_variable_w(name: &str, buffer: &mut [u16]) -> u32 {
    let result = Pal::global()
        .environment()
        .get_environment_variable_w(name, buffer);
    sentinel!(result, 0, lookup_length)
}

fn lookup_length(lookup: EnvLookup) -> u32 {
    let len = match lookup {
        EnvLookup::Copied(len) => len,
        EnvLookup::InsufficientBuffer(required) => {
            crate::set_last_error(crate::ErrorCode::INSUFFICIENT_BUFFER);
            required
        }
    };
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// `SetEnvironmentVariableA`: `None` deletes the variable.
pub fn set_environment_variable(name: &str, value: Option<&str>) -> bool {
    let result = Pal::global()
        .environment()
        .set_environment_variable(name, value);
    sentinel!(result, false, |()| true)
}

/// `TlsAlloc`: returns the new index, or [`TLS_OUT_OF_INDEXES`].
pub fn tls_alloc() -> u32 {
    sentinel!(Pal::global().tls().alloc(), TLS_OUT_OF_INDEXES, TlsIndex::value)
}

/// `TlsFree`
pub fn tls_free(index: u32) -> bool {
    sentinel!(Pal::global().tls().free(TlsIndex::new(index)), false, |()| true)
}

/// `TlsGetValue`: returns 0 on failure; on success the error state is set to
/// [`ErrorCode::SUCCESS`](crate::ErrorCode::SUCCESS) so that a stored 0 can be told apart
/// from a failure.
pub fn tls_get_value(index: u32) -> usize {
    sentinel!(
        Pal::global().tls().get_value(TlsIndex::new(index)),
        0,
        |value| {
            crate::set_last_error(crate::ErrorCode::SUCCESS);
            value
        }
    )
}

/// `TlsSetValue`
pub fn tls_set_value(index: u32, value: usize) -> bool {
    sentinel!(
        Pal::global().tls().set_value(TlsIndex::new(index), value),
        false,
        |()| true
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{get_last_error, set_last_error, ErrorCode};

    #[test]
    fn constants_match_win32() {
        assert_eq!(MEM_COMMIT, 0x1000);
        assert_eq!(MEM_RESERVE, 0x2000);
        assert_eq!(MEM_DECOMMIT, 0x4000);
        assert_eq!(MEM_RELEASE, 0x8000);
        assert_eq!(MEM_RESET, 0x80000);
        assert_eq!(PAGE_EXECUTE_READWRITE, 0x40);
        assert_eq!(HEAP_ZERO_MEMORY, 0x8);
    }

    #[test]
    fn unknown_flags_set_invalid_parameter() {
        set_last_error(ErrorCode::SUCCESS);
        assert!(virtual_alloc(ptr::null_mut(), 0x1000, 0x1, PAGE_READWRITE).is_null());
        assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);

        set_last_error(ErrorCode::SUCCESS);
        assert!(virtual_alloc(ptr::null_mut(), 0x1000, MEM_COMMIT, 0x3).is_null());
        assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);

        set_last_error(ErrorCode::SUCCESS);
        assert!(heap_alloc(get_process_heap(), 0x100, 8).is_null());
        assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);
    }

    #[test]
    fn protect_reports_previous_protection() {
        let block = virtual_alloc(
            ptr::null_mut(),
            0x1000,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        );
        let mut old = 0;
        assert!(virtual_protect(block, 0x1000, PAGE_READONLY, &mut old));
        assert_eq!(old, PAGE_READWRITE);
        assert!(virtual_free(block, 0, MEM_RELEASE));
    }

    #[test]
    fn tls_get_value_clears_error_on_success() {
        let index = tls_alloc();
        assert_ne!(index, TLS_OUT_OF_INDEXES);

        set_last_error(ErrorCode::INVALID_ADDRESS);
        assert_eq!(tls_get_value(index), 0);
        assert_eq!(get_last_error(), ErrorCode::SUCCESS);
        assert!(tls_free(index));

        assert!(!tls_free(index));
        assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);
    }

    #[test]
    fn heap_size_failure_sentinel() {
        let mut local = 0u8;
        assert_eq!(heap_size(get_process_heap(), 0, &mut local), usize::MAX);
        assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);
    }
}
