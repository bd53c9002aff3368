//! Per-thread "last error" state.
//!
//! Every OS thread owns exactly one [`ErrorCode`] slot. It starts at
//! [`ErrorCode::SUCCESS`], is written by failing operations through
//! [`crate::Error::record`] or [`set_last_error`], and dies with the thread. No other thread can
//! observe or modify it, so reads and writes need no synchronization.
//!
//! # Example
//!
//! ```rust
//! use dotpal::{get_last_error, set_last_error, ErrorCode};
//!
//! set_last_error(ErrorCode::new(50));
//! std::thread::spawn(|| {
//!     assert_eq!(get_last_error(), ErrorCode::SUCCESS);
//!     set_last_error(ErrorCode::new(20));
//! })
//! .join()
//! .unwrap();
//! assert_eq!(get_last_error(), ErrorCode::new(50));
//! ```

use std::cell::Cell;

use crate::ErrorCode;

thread_local! {
    static LAST_ERROR: Cell<ErrorCode> = const { Cell::new(ErrorCode::SUCCESS) };
}

/// Stores `code` as the calling thread's last error.
pub fn set_last_error(code: impl Into<ErrorCode>) {
    let code = code.into();
    LAST_ERROR.with(|slot| slot.set(code));
}

/// Returns the calling thread's last error.
#[must_use]
pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(Cell::get)
}

/// Resets the calling thread's last error to [`ErrorCode::SUCCESS`] and returns the previous value.
pub fn take_last_error() -> ErrorCode {
    LAST_ERROR.with(|slot| slot.replace(ErrorCode::SUCCESS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Barrier};
    use std::{sync::Arc, thread};

    #[test]
    fn defaults_to_success() {
        thread::spawn(|| assert_eq!(get_last_error(), ErrorCode::SUCCESS))
            .join()
            .unwrap();
    }

    #[test]
    fn isolated_between_threads() {
        set_last_error(50u32);

        let child = thread::spawn(|| {
            let seen = get_last_error();
            set_last_error(20u32);
            (seen, get_last_error())
        });
        let (seen, after) = child.join().unwrap();

        assert_eq!(seen, ErrorCode::SUCCESS);
        assert_eq!(after, ErrorCode::new(20));
        assert_eq!(get_last_error(), ErrorCode::new(50));
    }

    #[test]
    fn concurrent_writers_do_not_interfere() {
        let barrier = Arc::new(Barrier::new(8));
        let (tx, rx) = mpsc::channel();

        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let tx = tx.clone();
                thread::spawn(move || {
                    set_last_error(1000 + i);
                    barrier.wait();
                    tx.send((i, get_last_error())).unwrap();
                })
            })
            .collect();
        drop(tx);

        for handle in handles {
            handle.join().unwrap();
        }
        for (i, code) in rx {
            assert_eq!(code, ErrorCode::new(1000 + i));
        }
    }

    #[test]
    fn take_resets() {
        set_last_error(ErrorCode::INVALID_ADDRESS);
        assert_eq!(take_last_error(), ErrorCode::INVALID_ADDRESS);
        assert_eq!(get_last_error(), ErrorCode::SUCCESS);
    }
}
