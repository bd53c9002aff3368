//! `Interlocked*` primitives.
//!
//! Every operation is a single atomic read-modify-write with sequentially consistent ordering,
//! so each one also acts as a full memory barrier. Increment and decrement return the new
//! value; every other operation returns the value the target held before.
//!
//! ```rust
//! use std::sync::atomic::AtomicI32;
//! use dotpal::interlocked;
//!
//! let counter = AtomicI32::new(5);
//! assert_eq!(interlocked::increment(&counter), 6);
//! assert_eq!(interlocked::compare_exchange(&counter, 10, 6), 6);
//! assert_eq!(interlocked::compare_exchange(&counter, 20, 6), 10);
//! assert_eq!(interlocked::exchange_add(&counter, 5), 10);
//! assert_eq!(interlocked::decrement(&counter), 14);
//! ```

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicPtr, Ordering::SeqCst};

macro_rules! interlocked_ops {
    (
        $atomic:ty, $int:ty,
        $increment:ident, $decrement:ident, $exchange:ident, $compare_exchange:ident,
        $exchange_add:ident, $and:ident, $or:ident
    ) => {
        /// Adds one and returns the new value, wrapping on overflow.
        #[inline]
        pub fn $increment(target: &$atomic) -> $int {
            target.fetch_add(1, SeqCst).wrapping_add(1)
        }

        /// Subtracts one and returns the new value, wrapping on overflow.
        #[inline]
        pub fn $decrement(target: &$atomic) -> $int {
            target.fetch_sub(1, SeqCst).wrapping_sub(1)
        }

        /// Stores `value` and returns the previous value.
        #[inline]
        pub fn $exchange(target: &$atomic, value: $int) -> $int {
            target.swap(value, SeqCst)
        }

        /// Stores `exchange` if the target equals `comparand`; returns the previous value
        /// either way.
        #[inline]
        pub fn $compare_exchange(target: &$atomic, exchange: $int, comparand: $int) -> $int {
            match target.compare_exchange(comparand, exchange, SeqCst, SeqCst) {
                Ok(previous) | Err(previous) => previous,
            }
        }

        /// Adds `value` and returns the previous value, wrapping on overflow.
        #[inline]
        pub fn $exchange_add(target: &$atomic, value: $int) -> $int {
            target.fetch_add(value, SeqCst)
        }

        /// Bitwise-ands `value` into the target and returns the previous value.
        #[inline]
        pub fn $and(target: &$atomic, value: $int) -> $int {
            target.fetch_and(value, SeqCst)
        }

        /// Bitwise-ors `value` into the target and returns the previous value.
        #[inline]
        pub fn $or(target: &$atomic, value: $int) -> $int {
            target.fetch_or(value, SeqCst)
        }
    };
}

interlocked_ops!(
    AtomicI32, i32,
    increment, decrement, exchange, compare_exchange, exchange_add, and, or
);

interlocked_ops!(
    AtomicI64, i64,
    increment64, decrement64, exchange64, compare_exchange64, exchange_add64, and64, or64
);

/// Stores `value` and returns the previous pointer.
#[inline]
pub fn exchange_pointer<T>(target: &AtomicPtr<T>, value: *mut T) -> *mut T {
    target.swap(value, SeqCst)
}

/// Stores `exchange` if the target equals `comparand`; returns the previous pointer either way.
#[inline]
pub fn compare_exchange_pointer<T>(
    target: &AtomicPtr<T>,
    exchange: *mut T,
    comparand: *mut T,
) -> *mut T {
    match target.compare_exchange(comparand, exchange, SeqCst, SeqCst) {
        Ok(previous) | Err(previous) => previous,
    }
}
