//! Virtual memory reservation and commit.
//!
//! This module emulates `VirtualAlloc`, `VirtualFree`, `VirtualProtect` and `VirtualQuery` on
//! POSIX hosts. Address space is reserved with inaccessible anonymous mappings and committed by
//! changing page protection, while a side table records the per-page state the kernel cannot
//! report.
//!
//! # Key Components
//!
//! - [`VirtualMemory`] - The reservation/commit engine
//! - [`AllocationType`] / [`FreeType`] - Win32 `MEM_*` flags
//! - [`Protection`] - Win32 `PAGE_*` protections
//! - [`MemoryBasicInformation`] - Query results
//!
//! # Address Alignment
//!
//! Reservations with an address hint start on an [`allocation_granularity`] boundary (64 KiB by
//! default) and end on a page boundary. Commit, decommit and protect operate on whole pages.
//!
//! [`allocation_granularity`]: VirtualMemory::allocation_granularity

mod flags;
mod os;
mod virt;

pub use flags::{AllocationType, FreeType, MemoryState, Protection};
pub use virt::{MemoryBasicInformation, PageState, VirtualMemory};

/// Default alignment of hinted reservations, matching Windows.
pub const DEFAULT_ALLOCATION_GRANULARITY: usize = 0x10000;

/// Returns the host page size.
#[must_use]
pub fn page_size() -> usize {
    os::page_size()
}
