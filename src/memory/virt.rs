//! The reservation/commit engine behind `VirtualAlloc` and friends.
//!
//! [`VirtualMemory`] tracks every reservation it creates in an ordered region table keyed by
//! base address. Each region carries one [`PageState`] per page, which is the only source of
//! truth for the commit state and protection reported back to callers; the kernel mapping is
//! kept in step with it.
//!
//! # Page Lifecycle
//!
//! ```text
//!  Free ──reserve──▶ Reserved ──commit──▶ Committed
//!                       ▲                     │
//!                       └──────decommit───────┘
//!  Reserved/Committed ──release (base only)──▶ Free
//! ```
//!
//! Reserved pages are mapped `PROT_NONE` with no backing. Decommitting replaces the pages with a
//! fresh inaccessible mapping, so the next commit of the same range reads zeroes again.
//!
//! # Thread Safety
//!
//! All operations serialize on one engine-wide lock. Two concurrent reservations can never
//! overlap: the kernel hands out disjoint ranges and a hinted reservation is rejected unless it
//! lands exactly on the requested address.

use std::{collections::BTreeMap, fmt, ptr::NonNull, sync::Mutex};

use log::{debug, error, trace, warn};

use crate::{
    memory::{
        flags::{AllocationType, FreeType, MemoryState, Protection},
        os, DEFAULT_ALLOCATION_GRANULARITY,
    },
    Error, Result,
};

/// Commit state and protection of a single page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageState {
    /// `true` once the page is backed and accessible
    pub committed: bool,
    /// Current protection; [`Protection::NoAccess`] while reserved
    pub protection: Protection,
}

impl PageState {
    const RESERVED: PageState = PageState {
        committed: false,
        protection: Protection::NoAccess,
    };
}

/// A reservation tracked by the engine.
#[derive(Clone, Debug)]
struct Region {
    base: usize,
    size: usize,
    allocation_type: AllocationType,
    allocation_protect: Protection,
    pages: Vec<PageState>,
}

impl Region {
    fn end(&self) -> usize {
        self.base + self.size
    }

    fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    /// Returns the page index range covering `[start, end)`; both bounds must be page aligned
    /// and inside the region.
    fn page_range(&self, start: usize, end: usize, page_size: usize) -> std::ops::Range<usize> {
        (start - self.base) / page_size..(end - self.base) / page_size
    }
}

/// Result of [`VirtualMemory::query`], shaped like `MEMORY_BASIC_INFORMATION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBasicInformation {
    /// Page-aligned address that was queried
    pub base_address: usize,
    /// Base of the enclosing reservation, 0 for free memory
    pub allocation_base: usize,
    /// Protection requested when the reservation was created
    pub allocation_protect: Option<Protection>,
    /// Length of the run of pages, starting at `base_address`, that share `state` and `protect`
    pub region_size: usize,
    /// State of the pages in the run
    pub state: MemoryState,
    /// Protection of the pages in the run, `None` unless committed
    pub protect: Option<Protection>,
}

impl fmt::Display for MemoryBasicInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:X}+0x{:X} {} (allocation base 0x{:X})",
            self.base_address, self.region_size, self.state, self.allocation_base
        )?;
        if let Some(protect) = self.protect {
            write!(f, " {protect}")?;
        }
        Ok(())
    }
}

/// Emulates the Win32 virtual memory API on top of anonymous POSIX mappings.
///
/// # Examples
///
/// ```rust
/// use dotpal::memory::{AllocationType, FreeType, Protection, VirtualMemory};
///
/// let vm = VirtualMemory::default();
/// let base = vm.alloc(
///     std::ptr::null_mut(),
///     0x10000,
///     AllocationType::RESERVE | AllocationType::COMMIT,
///     Protection::ReadWrite,
/// )?;
/// unsafe { base.as_ptr().write(0x2A) };
/// vm.free(base.as_ptr(), 0, FreeType::RELEASE)?;
/// # Ok::<(), dotpal::Error>(())
/// ```
pub struct VirtualMemory {
    regions: Mutex<BTreeMap<usize, Region>>,
    page_size: usize,
    allocation_granularity: usize,
}

impl VirtualMemory {
    /// Creates an engine that aligns hinted reservations down to `allocation_granularity`.
    ///
    /// # Arguments
    ///
    /// * `allocation_granularity` - Reservation alignment, a power of two no smaller than the
    ///   host page size
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the granularity is not a power of two or is
    /// smaller than a page.
    pub fn new(allocation_granularity: usize) -> Result<Self> {
        let page_size = os::page_size();
        if !allocation_granularity.is_power_of_two() || allocation_granularity < page_size {
            return Err(Error::InvalidParameter(
                "allocation granularity must be a power of two of at least one page",
            ));
        }

        Ok(VirtualMemory {
            regions: Mutex::new(BTreeMap::new()),
            page_size,
            allocation_granularity,
        })
    }

    /// Returns the host page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the alignment applied to hinted reservations.
    #[must_use]
    pub fn allocation_granularity(&self) -> usize {
        self.allocation_granularity
    }

    /// Returns the number of live reservations.
    #[must_use]
    pub fn region_count(&self) -> usize {
        lock!(self.regions).len()
    }

    /// Reserves, commits or resets a range of pages.
    ///
    /// # Arguments
    ///
    /// * `address` - Preferred start address, or null to let the kernel choose
    /// * `size` - Length of the range in bytes
    /// * `allocation_type` - Any combination of `RESERVE` and `COMMIT`, or `RESET` alone
    /// * `protection` - Protection for committed pages
    ///
    /// # Returns
    ///
    /// The base of the reservation whenever this call created one (committing from the base
    /// through the end of the requested range), otherwise the page-aligned start of the
    /// committed (or reset) range.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] for a zero size, `WRITE_WATCH`, or a type without any
    ///   reserve, commit or reset flag
    /// - [`Error::InvalidAddress`] when a hinted reservation cannot be placed exactly, or a
    ///   commit runs past the end of its reservation
    /// - [`Error::NotEnoughMemory`] when the kernel is out of address space
    pub fn alloc(
        &self,
        address: *mut u8,
        size: usize,
        allocation_type: AllocationType,
        protection: Protection,
    ) -> Result<NonNull<u8>> {
        trace!(
            "alloc(address={:p}, size=0x{:X}, type={:?}, protection={})",
            address,
            size,
            allocation_type,
            protection
        );

        if size == 0 {
            return Err(Error::InvalidParameter("size is zero"));
        }
        if allocation_type.contains(AllocationType::WRITE_WATCH) {
            return Err(Error::InvalidParameter("MEM_WRITE_WATCH is not supported"));
        }
        if !allocation_type
            .intersects(AllocationType::RESERVE | AllocationType::COMMIT | AllocationType::RESET)
        {
            return Err(Error::InvalidParameter(
                "allocation type needs MEM_RESERVE, MEM_COMMIT or MEM_RESET",
            ));
        }
        if allocation_type.contains(AllocationType::TOP_DOWN) {
            warn!("MEM_TOP_DOWN is ignored");
        }

        if allocation_type.contains(AllocationType::RESET) {
            if allocation_type != AllocationType::RESET {
                return Err(Error::InvalidParameter("MEM_RESET must be used alone"));
            }
            return self.reset(address, size);
        }

        let hint = address as usize;
        let mut regions = lock!(self.regions);

        let needs_reserve = allocation_type.contains(AllocationType::RESERVE)
            || hint == 0
            || Self::find_region(&regions, hint).is_none();

        let mut reserved = None;
        if needs_reserve {
            let base = self.reserve(&mut regions, hint, size, allocation_type, protection)?;
            reserved = Some(base);
        }

        if !allocation_type.contains(AllocationType::COMMIT) {
            return reserved
                .and_then(|base| NonNull::new(base as *mut u8))
                .ok_or_else(|| internal_error!("reservation produced a null base"));
        }

        // A reservation made by this call is committed from, and reported as, its base.
        let (commit_start, commit_size) = match reserved {
            // `hint + size` was bounds-checked by the reservation.
            Some(base) if hint > base => (base, size + (hint - base)),
            Some(base) => (base, size),
            None => (hint, size),
        };
        match self.commit(&mut regions, commit_start, commit_size, protection) {
            Ok(start) => {
                NonNull::new(start as *mut u8).ok_or_else(|| internal_error!("commit at null"))
            }
            Err(error) => {
                if let Some(base) = reserved {
                    Self::release_region(&mut regions, base);
                }
                Err(error)
            }
        }
    }

    /// Decommits a page range or releases a whole reservation.
    ///
    /// # Arguments
    ///
    /// * `address` - Start of the range; for `RELEASE` the reservation base
    /// * `size` - Length to decommit; must be 0 for `RELEASE`
    /// * `free_type` - Exactly one of `DECOMMIT` or `RELEASE`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] for a null address, an address outside every reservation,
    ///   or a release that does not name a reservation base
    /// - [`Error::InvalidParameter`] for a bad flag combination or a size that does not fit
    ///   the operation
    pub fn free(&self, address: *mut u8, size: usize, free_type: FreeType) -> Result<()> {
        trace!(
            "free(address={:p}, size=0x{:X}, type={:?})",
            address,
            size,
            free_type
        );

        let address = address as usize;
        if address == 0 {
            return Err(Error::InvalidAddress {
                address,
                reason: "null address",
            });
        }
        if free_type != FreeType::DECOMMIT && free_type != FreeType::RELEASE {
            return Err(Error::InvalidParameter(
                "free type must be exactly one of MEM_DECOMMIT or MEM_RELEASE",
            ));
        }

        let mut regions = lock!(self.regions);

        if free_type == FreeType::RELEASE {
            if size != 0 {
                return Err(Error::InvalidParameter("MEM_RELEASE requires a size of 0"));
            }
            if !regions.contains_key(&address) {
                return Err(Error::InvalidAddress {
                    address,
                    reason: "not the base of a reservation",
                });
            }
            Self::release_region(&mut regions, address);
            return Ok(());
        }

        if size == 0 {
            return Err(Error::InvalidParameter("MEM_DECOMMIT requires a non-zero size"));
        }

        let (start, end) = self.page_bounds(address, size)?;
        let region = Self::find_region_mut(&mut regions, start).ok_or(Error::InvalidAddress {
            address,
            reason: "address is not reserved",
        })?;
        if end > region.end() {
            return Err(Error::InvalidAddress {
                address,
                reason: "range runs past the end of its reservation",
            });
        }

        // SAFETY: [start, end) lies inside a reservation owned by this engine.
        unsafe { os::discard(start, end - start) }.map_err(|error| {
            error!("decommit of 0x{start:X}+0x{:X} failed: {error}", end - start);
            Error::Io(error)
        })?;

        let pages = region.page_range(start, end, self.page_size);
        region.pages[pages].fill(PageState::RESERVED);
        debug!("decommitted 0x{start:X}..0x{end:X}");
        Ok(())
    }

    /// Changes the protection of committed pages.
    ///
    /// # Returns
    ///
    /// The protection the first page of the range had before the call.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] when the range is not fully inside one reservation, contains
    ///   uncommitted pages, or the kernel rejects the range
    /// - [`Error::InvalidAccess`] when the kernel refuses the protection
    pub fn protect(
        &self,
        address: *mut u8,
        size: usize,
        protection: Protection,
    ) -> Result<Protection> {
        trace!(
            "protect(address={:p}, size=0x{:X}, protection={})",
            address,
            size,
            protection
        );

        let address = address as usize;
        if size == 0 {
            return Err(Error::InvalidParameter("size is zero"));
        }

        let (start, end) = self.page_bounds(address, size)?;
        let mut regions = lock!(self.regions);
        let region = Self::find_region_mut(&mut regions, start).ok_or(Error::InvalidAddress {
            address,
            reason: "address is not reserved",
        })?;
        if end > region.end() {
            return Err(Error::InvalidAddress {
                address,
                reason: "range runs past the end of its reservation",
            });
        }

        let pages = region.page_range(start, end, self.page_size);
        if region.pages[pages.clone()].iter().any(|page| !page.committed) {
            return Err(Error::InvalidAddress {
                address,
                reason: "range contains uncommitted pages",
            });
        }
        let previous = region.pages[pages.start].protection;

        // SAFETY: every page in [start, end) is committed memory owned by this engine.
        unsafe { os::protect(start, end - start, protection.to_unix()) }.map_err(|error| {
            error!("mprotect of 0x{start:X}+0x{:X} failed: {error}", end - start);
            match error.raw_os_error() {
                Some(libc::EINVAL) => Error::InvalidAddress {
                    address,
                    reason: "kernel rejected the range",
                },
                Some(libc::EACCES) => Error::InvalidAccess,
                _ => Error::Io(error),
            }
        })?;

        for page in &mut region.pages[pages] {
            page.protection = protection;
        }
        Ok(previous)
    }

    /// Describes the pages around `address`.
    ///
    /// Addresses outside every reservation report [`MemoryState::Free`], with a run that
    /// reaches the next reservation (or one page if there is none above).
    #[must_use]
    pub fn query(&self, address: *const u8) -> MemoryBasicInformation {
        let page = os::align_down(address as usize, self.page_size);
        let regions = lock!(self.regions);

        let Some(region) = Self::find_region(&regions, page) else {
            let region_size = regions
                .range(page..)
                .next()
                .map_or(self.page_size, |(&next, _)| next - page);
            return MemoryBasicInformation {
                base_address: page,
                allocation_base: 0,
                allocation_protect: None,
                region_size,
                state: MemoryState::Free,
                protect: None,
            };
        };

        let first = (page - region.base) / self.page_size;
        let state = region.pages[first];
        let run = region.pages[first..]
            .iter()
            .take_while(|other| **other == state)
            .count();

        MemoryBasicInformation {
            base_address: page,
            allocation_base: region.base,
            allocation_protect: Some(region.allocation_protect),
            region_size: run * self.page_size,
            state: if state.committed {
                MemoryState::Commit
            } else {
                MemoryState::Reserve
            },
            protect: state.committed.then_some(state.protection),
        }
    }

    /// Returns the allocation type a reservation was created with.
    #[must_use]
    pub fn allocation_type(&self, base: *const u8) -> Option<AllocationType> {
        lock!(self.regions)
            .get(&(base as usize))
            .map(|region| region.allocation_type)
    }

    fn page_bounds(&self, address: usize, size: usize) -> Result<(usize, usize)> {
        let start = os::align_down(address, self.page_size);
        let end = address
            .checked_add(size)
            .and_then(|end| os::align_up(end, self.page_size))
            .ok_or(Error::InvalidParameter("range overflows the address space"))?;
        Ok((start, end))
    }

    fn find_region(regions: &BTreeMap<usize, Region>, address: usize) -> Option<&Region> {
        regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    fn find_region_mut(
        regions: &mut BTreeMap<usize, Region>,
        address: usize,
    ) -> Option<&mut Region> {
        regions
            .range_mut(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    fn reserve(
        &self,
        regions: &mut BTreeMap<usize, Region>,
        hint: usize,
        size: usize,
        allocation_type: AllocationType,
        protection: Protection,
    ) -> Result<usize> {
        let (start, len) = if hint == 0 {
            let len = os::align_up(size, self.page_size)
                .ok_or(Error::InvalidParameter("size overflows the address space"))?;
            (0, len)
        } else {
            let start = os::align_down(hint, self.allocation_granularity);
            let (_, end) = self.page_bounds(hint, size)?;
            (start, end - start)
        };

        let large_pages = allocation_type.contains(AllocationType::LARGE_PAGES);
        let base = os::reserve(start, len, large_pages).map_err(|error| {
            error!("reserve of 0x{start:X}+0x{len:X} failed: {error}");
            if start != 0 {
                Error::InvalidAddress {
                    address: start,
                    reason: "requested range is not available",
                }
            } else if error.raw_os_error() == Some(libc::ENOMEM) {
                Error::NotEnoughMemory
            } else {
                Error::Io(error)
            }
        })?;

        regions.insert(
            base,
            Region {
                base,
                size: len,
                allocation_type,
                allocation_protect: protection,
                pages: vec![PageState::RESERVED; len / self.page_size],
            },
        );
        debug!("reserved 0x{base:X}+0x{len:X}");
        Ok(base)
    }

    fn commit(
        &self,
        regions: &mut BTreeMap<usize, Region>,
        address: usize,
        size: usize,
        protection: Protection,
    ) -> Result<usize> {
        let (start, end) = self.page_bounds(address, size)?;
        let region = Self::find_region_mut(regions, start).ok_or(Error::InvalidAddress {
            address,
            reason: "address is not reserved",
        })?;
        if end > region.end() {
            return Err(Error::InvalidAddress {
                address,
                reason: "range runs past the end of its reservation",
            });
        }

        let pages = region.page_range(start, end, self.page_size);
        let target = PageState {
            committed: true,
            protection,
        };
        if region.pages[pages.clone()].iter().all(|page| *page == target) {
            return Ok(start);
        }

        // SAFETY: [start, end) lies inside a reservation owned by this engine; committed pages
        // in the range only change protection.
        unsafe { os::protect(start, end - start, protection.to_unix()) }.map_err(|error| {
            error!("commit of 0x{start:X}+0x{:X} failed: {error}", end - start);
            match error.raw_os_error() {
                Some(libc::ENOMEM | libc::EAGAIN) => Error::NotEnoughMemory,
                _ => Error::Io(error),
            }
        })?;
        os::include_in_dump(start, end - start);

        region.pages[pages].fill(target);
        debug!("committed 0x{start:X}..0x{end:X} as {protection}");
        Ok(start)
    }

    fn reset(&self, address: *mut u8, size: usize) -> Result<NonNull<u8>> {
        let Some(result) = NonNull::new(address) else {
            return Err(Error::InvalidAddress {
                address: 0,
                reason: "MEM_RESET requires an address",
            });
        };

        let (start, end) = self.page_bounds(address as usize, size)?;
        let regions = lock!(self.regions);
        let region = Self::find_region(&regions, start).ok_or(Error::InvalidAddress {
            address: start,
            reason: "address is not reserved",
        })?;
        if end > region.end() {
            return Err(Error::InvalidAddress {
                address: start,
                reason: "range runs past the end of its reservation",
            });
        }

        // SAFETY: [start, end) lies inside a private anonymous reservation owned by this engine.
        unsafe { os::reset(start, end - start) }?;
        debug!("reset 0x{start:X}..0x{end:X}");
        Ok(result)
    }

    fn release_region(regions: &mut BTreeMap<usize, Region>, base: usize) {
        if let Some(region) = regions.remove(&base) {
            // SAFETY: the region was mapped by this engine and is no longer tracked.
            if let Err(error) = unsafe { os::unmap(region.base, region.size) } {
                error!("munmap of 0x{:X}+0x{:X} failed: {error}", region.base, region.size);
            } else {
                debug!("released 0x{:X}+0x{:X}", region.base, region.size);
            }
        }
    }
}

impl Default for VirtualMemory {
    fn default() -> Self {
        VirtualMemory {
            regions: Mutex::new(BTreeMap::new()),
            page_size: os::page_size(),
            allocation_granularity: DEFAULT_ALLOCATION_GRANULARITY.max(os::page_size()),
        }
    }
}

impl Drop for VirtualMemory {
    fn drop(&mut self) {
        let regions = match self.regions.get_mut() {
            Ok(regions) => regions,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bases: Vec<usize> = regions.keys().copied().collect();
        for base in bases {
            Self::release_region(regions, base);
        }
    }
}

impl fmt::Debug for VirtualMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMemory")
            .field("page_size", &self.page_size)
            .field("allocation_granularity", &self.allocation_granularity)
            .field("regions", &self.region_count())
            .finish()
    }
}
