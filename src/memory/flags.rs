//! Allocation, release and protection flags in their Win32 encodings.

use bitflags::bitflags;
use strum::{Display, EnumIter};

bitflags! {
    /// Allocation type passed to [`VirtualMemory::alloc`](crate::memory::VirtualMemory::alloc).
    ///
    /// At least one of [`COMMIT`](Self::COMMIT), [`RESERVE`](Self::RESERVE) or
    /// [`RESET`](Self::RESET) must be present.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AllocationType: u32 {
        /// Back the range with zero-filled, accessible pages
        const COMMIT = 0x0000_1000;
        /// Reserve address space without backing it
        const RESERVE = 0x0000_2000;
        /// Discard page contents while keeping the pages committed
        const RESET = 0x0008_0000;
        /// Prefer high addresses (accepted and ignored)
        const TOP_DOWN = 0x0010_0000;
        /// Track writes to the range (not supported)
        const WRITE_WATCH = 0x0020_0000;
        /// Map with huge pages where the host supports it
        const LARGE_PAGES = 0x2000_0000;
        /// Reservation intended for generated code
        const RESERVE_EXECUTABLE = 0x4000_0000;
    }
}

bitflags! {
    /// Release operation passed to [`VirtualMemory::free`](crate::memory::VirtualMemory::free).
    ///
    /// Exactly one flag must be set.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FreeType: u32 {
        /// Drop the backing of a page range, keep the reservation
        const DECOMMIT = 0x0000_4000;
        /// Drop the whole reservation
        const RELEASE = 0x0000_8000;
    }
}

/// Page access protection.
///
/// The discriminants are the Win32 `PAGE_*` values, so a protection converts to and from its
/// wire encoding without a lookup table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u32)]
pub enum Protection {
    /// `PAGE_NOACCESS`
    #[strum(serialize = "PAGE_NOACCESS")]
    NoAccess = 0x01,
    /// `PAGE_READONLY`
    #[strum(serialize = "PAGE_READONLY")]
    ReadOnly = 0x02,
    /// `PAGE_READWRITE`
    #[strum(serialize = "PAGE_READWRITE")]
    ReadWrite = 0x04,
    /// `PAGE_EXECUTE`
    #[strum(serialize = "PAGE_EXECUTE")]
    Execute = 0x10,
    /// `PAGE_EXECUTE_READ`
    #[strum(serialize = "PAGE_EXECUTE_READ")]
    ExecuteRead = 0x20,
    /// `PAGE_EXECUTE_READWRITE`
    #[strum(serialize = "PAGE_EXECUTE_READWRITE")]
    ExecuteReadWrite = 0x40,
}

impl Protection {
    /// Decodes a Win32 `PAGE_*` value.
    ///
    /// Returns `None` for unknown values and for combinations of several protections, which
    /// Windows rejects as well.
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0x01 => Protection::NoAccess,
            0x02 => Protection::ReadOnly,
            0x04 => Protection::ReadWrite,
            0x10 => Protection::Execute,
            0x20 => Protection::ExecuteRead,
            0x40 => Protection::ExecuteReadWrite,
            _ => return None,
        })
    }

    /// Returns the Win32 `PAGE_*` value.
    #[must_use]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Returns the matching `PROT_*` mask for `mmap`/`mprotect`.
    #[must_use]
    pub fn to_unix(self) -> libc::c_int {
        match self {
            Protection::NoAccess => libc::PROT_NONE,
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::Execute => libc::PROT_EXEC,
            Protection::ExecuteRead => libc::PROT_EXEC | libc::PROT_READ,
            Protection::ExecuteReadWrite => libc::PROT_EXEC | libc::PROT_READ | libc::PROT_WRITE,
        }
    }

    /// Returns `true` if the protection allows reads.
    #[must_use]
    pub fn is_readable(self) -> bool {
        self.to_unix() & libc::PROT_READ != 0
    }

    /// Returns `true` if the protection allows writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        self.to_unix() & libc::PROT_WRITE != 0
    }
}

/// State of a page as reported by [`VirtualMemory::query`](crate::memory::VirtualMemory::query).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[repr(u32)]
pub enum MemoryState {
    /// `MEM_COMMIT`
    #[strum(serialize = "MEM_COMMIT")]
    Commit = 0x0000_1000,
    /// `MEM_RESERVE`
    #[strum(serialize = "MEM_RESERVE")]
    Reserve = 0x0000_2000,
    /// `MEM_FREE`
    #[strum(serialize = "MEM_FREE")]
    Free = 0x0001_0000,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn protection_round_trips_its_encoding() {
        for protection in Protection::iter() {
            assert_eq!(Protection::from_bits(protection.bits()), Some(protection));
        }
    }

    #[test]
    fn combined_or_unknown_protection_is_rejected() {
        assert_eq!(Protection::from_bits(0x04 | 0x02), None);
        assert_eq!(Protection::from_bits(0x08), None);
        assert_eq!(Protection::from_bits(0), None);
    }

    #[test]
    fn unix_masks() {
        assert_eq!(Protection::NoAccess.to_unix(), libc::PROT_NONE);
        assert!(Protection::ExecuteReadWrite.is_writable());
        assert!(!Protection::ExecuteRead.is_writable());
        assert!(Protection::ReadOnly.is_readable());
        assert!(!Protection::Execute.is_readable());
    }

    #[test]
    fn display_uses_win32_names() {
        assert_eq!(Protection::ReadWrite.to_string(), "PAGE_READWRITE");
        assert_eq!(MemoryState::Reserve.to_string(), "MEM_RESERVE");
    }

    #[test]
    fn allocation_type_rejects_unknown_bits() {
        assert!(AllocationType::from_bits(0x1000 | 0x2000).is_some());
        assert!(AllocationType::from_bits(0x1).is_none());
        assert!(FreeType::from_bits(0x4000).is_some());
        assert!(FreeType::from_bits(0x10).is_none());
    }
}
