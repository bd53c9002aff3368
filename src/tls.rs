//! Thread-local storage slots with `TlsAlloc` semantics.
//!
//! A [`TlsTable`] hands out indices into a fixed-size slot table. Every thread sees its own
//! pointer-sized value per index, initially 0. Indices are reusable after
//! [`free`](TlsTable::free), and a reused index never exposes values stored under its previous
//! owner: each allocation stamps the slot with a fresh generation and values recorded under an
//! older generation read as 0.
//!
//! Allocation and release are lock-free compare-and-swap operations on the slot generations;
//! value access only touches the calling thread's own storage. That storage is pruned as it
//! grows: values for freed indices and for dropped tables are discarded on the next pass.
//!
//! # Example
//!
//! ```rust
//! use dotpal::tls::TlsTable;
//!
//! let table = TlsTable::default();
//! let index = table.alloc()?;
//! table.set_value(index, 0xBEEF)?;
//!
//! let seen = std::thread::scope(|s| s.spawn(|| table.get_value(index)).join().unwrap())?;
//! assert_eq!(seen, 0);
//! assert_eq!(table.get_value(index)?, 0xBEEF);
//! table.free(index)?;
//! # Ok::<(), dotpal::Error>(())
//! ```

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use log::debug;

use crate::{Error, Result};

/// Number of indices every table guarantees.
pub const TLS_MINIMUM_AVAILABLE: usize = 64;

/// Additional indices available beyond the guaranteed ones.
pub const TLS_EXPANSION_SLOTS: usize = 1024;

/// Default table capacity.
pub const TLS_DEFAULT_CAPACITY: usize = TLS_MINIMUM_AVAILABLE + TLS_EXPANSION_SLOTS;

/// Stored values a thread may accumulate before the first prune pass.
const PRUNE_THRESHOLD: usize = 64;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static VALUES: RefCell<ThreadValues> = RefCell::new(ThreadValues::new());
}

/// One thread's values for one table.
struct TableValues {
    slots: Weak<[AtomicU64]>,
    /// index -> (generation, value)
    values: HashMap<u32, (u64, usize)>,
}

/// Every value the current thread stored, grouped by table id.
struct ThreadValues {
    tables: HashMap<u64, TableValues>,
    entries: usize,
    prune_at: usize,
}

impl ThreadValues {
    fn new() -> Self {
        ThreadValues {
            tables: HashMap::new(),
            entries: 0,
            prune_at: PRUNE_THRESHOLD,
        }
    }

    fn get(&mut self, table: u64, index: u32, generation: u64) -> usize {
        let Some(values) = self.tables.get_mut(&table) else {
            return 0;
        };
        match values.values.get(&index) {
            Some(&(stored, value)) if stored == generation => value,
            Some(_) => {
                values.values.remove(&index);
                self.entries -= 1;
                0
            }
            None => 0,
        }
    }

    fn set(&mut self, table: &TlsTable, index: u32, generation: u64, value: usize) {
        let values = self.tables.entry(table.id).or_insert_with(|| TableValues {
            slots: Arc::downgrade(&table.slots),
            values: HashMap::new(),
        });
        if values.values.insert(index, (generation, value)).is_none() {
            self.entries += 1;
            if self.entries >= self.prune_at {
                self.prune();
            }
        }
    }

    /// Discards values of dropped tables and of indices freed since they were stored.
    fn prune(&mut self) {
        self.tables.retain(|_, table| {
            let Some(slots) = table.slots.upgrade() else {
                return false;
            };
            table.values.retain(|index, (generation, _)| {
                slots
                    .get(*index as usize)
                    .is_some_and(|slot| slot.load(Ordering::Acquire) == *generation)
            });
            !table.values.is_empty()
        });
        self.entries = self.tables.values().map(|table| table.values.len()).sum();
        self.prune_at = PRUNE_THRESHOLD.max(self.entries * 2);
    }

    fn forget(&mut self, table: u64) {
        if let Some(values) = self.tables.remove(&table) {
            self.entries -= values.values.len();
        }
    }
}

/// An allocated slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlsIndex(u32);

impl TlsIndex {
    /// Wraps a raw index value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        TlsIndex(value)
    }

    /// Returns the raw index value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TlsIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-capacity table of thread-local slots.
pub struct TlsTable {
    id: u64,
    slots: Arc<[AtomicU64]>,
    generation: AtomicU64,
    in_use: AtomicUsize,
}

impl TlsTable {
    /// Creates a table with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `capacity` is below [`TLS_MINIMUM_AVAILABLE`] or
    /// does not fit a `u32` index.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < TLS_MINIMUM_AVAILABLE {
            return Err(Error::InvalidParameter(
                "TLS capacity must be at least 64 slots",
            ));
        }
        if u32::try_from(capacity).map_or(true, |value| value == u32::MAX) {
            return Err(Error::InvalidParameter("TLS capacity is too large"));
        }

        Ok(TlsTable {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            generation: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of allocated indices.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Allocates an index whose value reads 0 on every thread (`TlsAlloc`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMoreItems`] when every slot is in use.
    pub fn alloc(&self) -> Result<TlsIndex> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .compare_exchange(0, generation, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.in_use.fetch_add(1, Ordering::AcqRel);
                debug!("TLS index {index} allocated (generation {generation})");
                #[allow(clippy::cast_possible_truncation)] // capacity fits u32, checked in new
                return Ok(TlsIndex(index as u32));
            }
        }

        Err(Error::NoMoreItems)
    }

    /// Releases an index (`TlsFree`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the index is out of range or not allocated.
    pub fn free(&self, index: TlsIndex) -> Result<()> {
        let slot = self.slot(index)?;
        let generation = slot.load(Ordering::Acquire);
        if generation == 0
            || slot
                .compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
        {
            return Err(Error::InvalidParameter("TLS index is not allocated"));
        }

        self.in_use.fetch_sub(1, Ordering::AcqRel);
        debug!("TLS index {index} freed");
        Ok(())
    }

    /// Returns the calling thread's value for `index` (`TlsGetValue`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the index is out of range or not allocated.
    pub fn get_value(&self, index: TlsIndex) -> Result<usize> {
        let generation = self.live_generation(index)?;
        Ok(VALUES.with(|values| values.borrow_mut().get(self.id, index.0, generation)))
    }

    /// Stores the calling thread's value for `index` (`TlsSetValue`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the index is out of range or not allocated.
    pub fn set_value(&self, index: TlsIndex, value: usize) -> Result<()> {
        let generation = self.live_generation(index)?;
        VALUES.with(|values| values.borrow_mut().set(self, index.0, generation, value));
        Ok(())
    }

    fn slot(&self, index: TlsIndex) -> Result<&AtomicU64> {
        self.slots
            .get(index.0 as usize)
            .ok_or(Error::InvalidParameter("TLS index is out of range"))
    }

    fn live_generation(&self, index: TlsIndex) -> Result<u64> {
        match self.slot(index)?.load(Ordering::Acquire) {
            0 => Err(Error::InvalidParameter("TLS index is not allocated")),
            generation => Ok(generation),
        }
    }
}

impl Default for TlsTable {
    fn default() -> Self {
        TlsTable {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            slots: (0..TLS_DEFAULT_CAPACITY).map(|_| AtomicU64::new(0)).collect(),
            generation: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
        }
    }
}

impl Drop for TlsTable {
    fn drop(&mut self) {
        let id = self.id;
        // Other threads discard their values on their next prune pass, or when they exit.
        let _ = VALUES.try_with(|values| values.borrow_mut().forget(id));
    }
}

impl fmt::Debug for TlsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTable")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}
