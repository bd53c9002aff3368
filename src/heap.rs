//! Heap allocation with `HeapAlloc` semantics.
//!
//! A [`Heap`] hands out 16-byte aligned blocks from the platform allocator and records each
//! live block in a concurrent table, so that sizes can be reported, foreign pointers rejected
//! and every remaining block released when the heap is dropped.
//!
//! # Serialization
//!
//! Unless created with [`HeapFlags::NO_SERIALIZE`], a heap enters its own
//! [`CriticalSection`] around every operation, and [`Heap::lock`] lets a caller hold it across
//! several calls. The process heap is created with `NO_SERIALIZE`: the platform allocator and
//! the block table are already safe for concurrent use.
//!
//! # Example
//!
//! ```rust
//! use dotpal::heap::{Heap, HeapFlags, HeapOptions};
//!
//! let heap = Heap::new(HeapOptions::default());
//! let block = heap.alloc(HeapFlags::ZERO_MEMORY, 32)?;
//! assert_eq!(heap.size(block.as_ptr())?, 32);
//!
//! let grown = heap.realloc(HeapFlags::empty(), block.as_ptr(), 64)?;
//! assert!(grown.is_some());
//! assert!(heap.realloc(HeapFlags::empty(), grown.unwrap().as_ptr(), 0)?.is_none());
//! assert_eq!(heap.block_count(), 0);
//! # Ok::<(), dotpal::Error>(())
//! ```

use std::{
    alloc::{self, Layout},
    fmt,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use bitflags::bitflags;
use dashmap::DashMap;
use log::{debug, trace};

use crate::{critsec::CriticalSectionGuard, CriticalSection, Error, Result};

/// Alignment of every block, matching `MEMORY_ALLOCATION_ALIGNMENT` on 64-bit Windows.
pub const HEAP_ALIGNMENT: usize = 16;

bitflags! {
    /// Heap creation and per-call flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeapFlags: u32 {
        /// Skip the heap's own critical section
        const NO_SERIALIZE = 0x0000_0001;
        /// Raise exceptions on failure (accepted and ignored)
        const GENERATE_EXCEPTIONS = 0x0000_0004;
        /// Zero-fill new memory
        const ZERO_MEMORY = 0x0000_0008;
    }
}

/// Construction parameters for a [`Heap`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapOptions {
    /// Flags applied to every operation on the heap
    pub flags: HeapFlags,
    /// Upper bound on the sum of live block sizes, `None` for unbounded
    pub maximum_size: Option<usize>,
}

impl HeapOptions {
    /// Options of the process heap.
    #[must_use]
    pub fn process() -> Self {
        HeapOptions {
            flags: HeapFlags::NO_SERIALIZE,
            maximum_size: None,
        }
    }

    /// Sets the heap-wide flags.
    #[must_use]
    pub fn with_flags(mut self, flags: HeapFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Caps the total size of live blocks.
    #[must_use]
    pub fn with_maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }
}

#[derive(Clone, Copy, Debug)]
struct Block {
    size: usize,
    layout: Layout,
}

/// A growable heap backed by the platform allocator.
pub struct Heap {
    flags: HeapFlags,
    maximum_size: Option<usize>,
    blocks: DashMap<usize, Block>,
    allocated: AtomicUsize,
    section: CriticalSection,
}

/// Holds a heap's critical section until dropped (`HeapLock` / `HeapUnlock`).
#[must_use = "the heap is unlocked as soon as the guard is dropped"]
pub struct HeapLock<'a> {
    _guard: CriticalSectionGuard<'a>,
}

impl Heap {
    /// Creates an empty heap (`HeapCreate`).
    #[must_use]
    pub fn new(options: HeapOptions) -> Self {
        debug!(
            "heap created with {:?}, maximum {:?}",
            options.flags, options.maximum_size
        );
        Heap {
            flags: options.flags,
            maximum_size: options.maximum_size,
            blocks: DashMap::new(),
            allocated: AtomicUsize::new(0),
            section: CriticalSection::new(),
        }
    }

    /// Returns the heap-wide flags.
    #[must_use]
    pub fn flags(&self) -> HeapFlags {
        self.flags
    }

    /// Allocates `size` bytes.
    ///
    /// A zero-size request still yields a unique, freeable pointer.
    ///
    /// # Arguments
    ///
    /// * `flags` - Per-call flags, combined with the heap-wide ones
    /// * `size` - Requested size in bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnoughMemory`] when the heap's maximum size would be exceeded or the
    /// platform allocator fails.
    pub fn alloc(&self, flags: HeapFlags, size: usize) -> Result<NonNull<u8>> {
        trace!("heap alloc(flags={flags:?}, size={size})");
        let flags = flags | self.flags;
        let _guard = self.serialize(flags);

        self.charge(size)?;
        let layout = match Self::layout(size) {
            Ok(layout) => layout,
            Err(error) => {
                self.refund(size);
                return Err(error);
            }
        };

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe {
            if flags.contains(HeapFlags::ZERO_MEMORY) {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let Some(block) = NonNull::new(raw) else {
            self.refund(size);
            return Err(Error::NotEnoughMemory);
        };

        self.blocks
            .insert(block.as_ptr() as usize, Block { size, layout });
        Ok(block)
    }

    /// Frees a block (`HeapFree`). Freeing null succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `ptr` is not a live block of this heap.
    pub fn free(&self, flags: HeapFlags, ptr: *mut u8) -> Result<()> {
        trace!("heap free(flags={flags:?}, ptr={ptr:p})");
        if ptr.is_null() {
            return Ok(());
        }

        let _guard = self.serialize(flags | self.flags);
        let (_, block) = self
            .blocks
            .remove(&(ptr as usize))
            .ok_or(Error::InvalidParameter("pointer is not a block of this heap"))?;

        // SAFETY: `ptr` was allocated by this heap with `block.layout` and is now untracked.
        unsafe { alloc::dealloc(ptr, block.layout) };
        self.refund(block.size);
        Ok(())
    }

    /// Resizes a block with C-runtime `realloc` semantics.
    ///
    /// - a null `ptr` allocates
    /// - a zero `size` frees and returns `None`
    /// - otherwise the contents up to the smaller size are preserved, and with
    ///   [`HeapFlags::ZERO_MEMORY`] any grown tail is zeroed
    ///
    /// On failure the original block is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `ptr` is not a live block of this heap
    /// - [`Error::NotEnoughMemory`] when the block cannot grow
    pub fn realloc(
        &self,
        flags: HeapFlags,
        ptr: *mut u8,
        size: usize,
    ) -> Result<Option<NonNull<u8>>> {
        trace!("heap realloc(flags={flags:?}, ptr={ptr:p}, size={size})");
        let flags = flags | self.flags;

        if ptr.is_null() {
            return self.alloc(flags, size).map(Some);
        }
        if size == 0 {
            self.free(flags, ptr)?;
            return Ok(None);
        }

        let _guard = self.serialize(flags);
        // The entry leaves the table before the allocator can hand its address to another
        // thread, and is put back on every failure path.
        let (_, old) = self
            .blocks
            .remove(&(ptr as usize))
            .ok_or(Error::InvalidParameter("pointer is not a block of this heap"))?;

        if size > old.size {
            if let Err(error) = self.charge(size - old.size) {
                self.blocks.insert(ptr as usize, old);
                return Err(error);
            }
        }
        let layout = match Self::layout(size) {
            Ok(layout) => layout,
            Err(error) => {
                if size > old.size {
                    self.refund(size - old.size);
                }
                self.blocks.insert(ptr as usize, old);
                return Err(error);
            }
        };

        // SAFETY: `ptr` is a live block allocated with `old.layout`; the new size is non-zero
        // and was validated by `Layout::from_size_align`.
        let raw = unsafe { alloc::realloc(ptr, old.layout, layout.size()) };
        let Some(block) = NonNull::new(raw) else {
            if size > old.size {
                self.refund(size - old.size);
            }
            self.blocks.insert(ptr as usize, old);
            return Err(Error::NotEnoughMemory);
        };

        if size < old.size {
            self.refund(old.size - size);
        }
        if flags.contains(HeapFlags::ZERO_MEMORY) && size > old.size {
            // SAFETY: the block is `size` bytes long; the tail past `old.size` is ours to write.
            unsafe { ptr::write_bytes(block.as_ptr().add(old.size), 0, size - old.size) };
        }

        self.blocks
            .insert(block.as_ptr() as usize, Block { size, layout });
        Ok(Some(block))
    }

    /// Returns the requested size of a live block (`HeapSize`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `ptr` is not a live block of this heap.
    pub fn size(&self, ptr: *const u8) -> Result<usize> {
        self.blocks
            .get(&(ptr as usize))
            .map(|block| block.size)
            .ok_or(Error::InvalidParameter("pointer is not a block of this heap"))
    }

    /// Returns `true` if `ptr` is a live block of this heap.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.blocks.contains_key(&(ptr as usize))
    }

    /// Enters the heap's critical section until the guard is dropped.
    pub fn lock(&self) -> HeapLock<'_> {
        HeapLock {
            _guard: self.section.enter(),
        }
    }

    /// Returns the sum of the requested sizes of all live blocks.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn serialize(&self, flags: HeapFlags) -> Option<CriticalSectionGuard<'_>> {
        (!flags.contains(HeapFlags::NO_SERIALIZE)).then(|| self.section.enter())
    }

    fn layout(size: usize) -> Result<Layout> {
        Layout::from_size_align(size.max(1), HEAP_ALIGNMENT).map_err(|_| Error::NotEnoughMemory)
    }

    fn charge(&self, size: usize) -> Result<()> {
        match self.maximum_size {
            Some(maximum) => self
                .allocated
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    current.checked_add(size).filter(|total| *total <= maximum)
                })
                .map(|_| ())
                .map_err(|_| Error::NotEnoughMemory),
            None => {
                self.allocated.fetch_add(size, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    fn refund(&self, size: usize) {
        self.allocated.fetch_sub(size, Ordering::AcqRel);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new(HeapOptions::default())
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let count = self.blocks.len();
        for (address, block) in std::mem::take(&mut self.blocks) {
            // SAFETY: every tracked block was allocated by this heap with its recorded layout.
            unsafe { alloc::dealloc(address as *mut u8, block.layout) };
        }
        if count > 0 {
            debug!("heap destroyed with {count} live blocks");
        }
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("flags", &self.flags)
            .field("maximum_size", &self.maximum_size)
            .field("blocks", &self.block_count())
            .field("allocated", &self.allocated_bytes())
            .finish()
    }
}
