//! Recursive mutual exclusion with `CRITICAL_SECTION` semantics.
//!
//! A [`CriticalSection`] may be entered again by the thread that already owns it; every
//! [`enter`](CriticalSection::enter) hands back a guard and ownership ends when the last guard of
//! the owning thread is dropped.
//!
//! # Example
//!
//! ```rust
//! use dotpal::CriticalSection;
//!
//! let section = CriticalSection::new();
//! let outer = section.enter();
//! let inner = section.enter();
//! assert!(section.is_locked());
//! drop(inner);
//! drop(outer);
//! assert!(!section.is_locked());
//! ```

use std::fmt;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// A recursive lock.
#[derive(Default)]
pub struct CriticalSection {
    mutex: ReentrantMutex<()>,
}

/// Proof of ownership of a [`CriticalSection`]; dropping it leaves the section once.
#[must_use = "the critical section is left as soon as the guard is dropped"]
pub struct CriticalSectionGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl CriticalSection {
    /// Creates an unowned critical section.
    #[must_use]
    pub fn new() -> Self {
        CriticalSection {
            mutex: ReentrantMutex::new(()),
        }
    }

    /// Enters the section, blocking while another thread owns it.
    pub fn enter(&self) -> CriticalSectionGuard<'_> {
        CriticalSectionGuard {
            _guard: self.mutex.lock(),
        }
    }

    /// Enters the section if it is free or already owned by the calling thread.
    pub fn try_enter(&self) -> Option<CriticalSectionGuard<'_>> {
        self.mutex
            .try_lock()
            .map(|guard| CriticalSectionGuard { _guard: guard })
    }

    /// Returns `true` if any thread currently owns the section.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Returns `true` if the calling thread owns the section.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.mutex.is_owned_by_current_thread()
    }
}

impl fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("locked", &self.is_locked())
            .finish()
    }
}
