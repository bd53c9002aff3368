// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'memory/os.rs' wraps mmap, mprotect, munmap and madvise
// - 'environment/mod.rs' offers an unlocked read for single-threaded startup code
// - 'heap.rs' calls the global allocator directly

//! # dotpal
//!
//! A platform abstraction layer that emulates the Windows memory, environment, thread-local
//! storage and error-reporting semantics a managed runtime expects, on top of POSIX hosts.
//!
//! ## Features
//!
//! - **🧱 Virtual memory** - `VirtualAlloc`-style reserve/commit/decommit/release with exact
//!   page state tracking and zero-filled recommits
//! - **📦 Heaps** - 16-byte aligned heap blocks with `HeapAlloc` and `realloc` semantics
//! - **🌿 Environment** - A locked environment table with the Win32 buffer-size protocol,
//!   environment blocks and `%NAME%` expansion
//! - **🧵 Thread-local storage** - Lock-free TLS index allocation with reuse-safe generations
//! - **⚠️ Last error** - A per-thread Win32 error code fed by every failing operation
//! - **🗺️ Mapped images** - Read-only memory-mapped files with container format detection
//! - **🔒 Synchronization** - `Interlocked*` primitives and recursive critical sections
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! dotpal = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust
//! use dotpal::prelude::*;
//!
//! let pal = Pal::new(PalConfig::isolated())?;
//!
//! let region = pal.virtual_memory().alloc(
//!     std::ptr::null_mut(),
//!     0x4000,
//!     AllocationType::RESERVE | AllocationType::COMMIT,
//!     Protection::ReadWrite,
//! )?;
//! pal.virtual_memory().free(region.as_ptr(), 0, FreeType::RELEASE)?;
//!
//! let block = pal.process_heap().alloc(HeapFlags::ZERO_MEMORY, 0)?;
//! pal.process_heap().free(HeapFlags::empty(), block.as_ptr())?;
//! # Ok::<(), dotpal::Error>(())
//! ```
//!
//! ### Win32 Calling Convention
//!
//! The [`win32`] module exposes the same functionality with sentinel return values and the
//! per-thread error state, against the process-wide [`Pal::global`] instance:
//!
//! ```rust
//! use dotpal::{get_last_error, win32, ErrorCode};
//!
//! let mut buffer = [0u8; 16];
//! assert_eq!(win32::get_environment_variable("DOTPAL_UNSET_VARIABLE", &mut buffer), 0);
//! assert_eq!(get_last_error(), ErrorCode::ENVVAR_NOT_FOUND);
//! ```
//!
//! ## Architecture
//!
//! - [`Pal`] - The process instance owning every stateful component
//! - [`config`] - [`PalConfig`] and its per-component sub-configurations
//! - [`memory`] - The virtual memory reservation/commit engine
//! - [`heap`] - Heap allocation
//! - [`environment`] - The environment store
//! - [`tls`] - Thread-local storage slots
//! - [`mod@lasterror`] - The per-thread error state
//! - [`mapped`] - Memory-mapped images
//! - [`interlocked`] and [`critsec`] - Synchronization primitives
//! - [`win32`] - Sentinel-style entry points
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result<T, Error>`](Result). Each [`Error`] maps onto a
//! Win32 error number through [`Error::code`]; [`Error::record`] stores it into the calling
//! thread's error state:
//!
//! ```rust
//! use dotpal::{get_last_error, Error, ErrorCode, Pal, PalConfig};
//!
//! let pal = Pal::new(PalConfig::isolated())?;
//! match pal.environment().set_environment_variable("A=B", Some("x")) {
//!     Err(error @ Error::InvalidParameter(_)) => error.record(),
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(get_last_error(), ErrorCode::INVALID_PARAMETER);
//! # Ok::<(), dotpal::Error>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger of its own: operation
//! entry at `trace`, state transitions at `debug`, ignored flags at `warn` and failed system
//! calls at `error`.
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//!
//! # Fuzz environment block parsing
//! cargo +nightly fuzz run envblock --release
//! ```

#[cfg(not(unix))]
compile_error!("dotpal only supports POSIX hosts");

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

mod context;

/// Convenient re-exports of the most commonly used types.
///
/// ```rust
/// use dotpal::prelude::*;
///
/// let pal = Pal::new(PalConfig::isolated())?;
/// let index: TlsIndex = pal.tls().alloc()?;
/// pal.tls().free(index)?;
/// # Ok::<(), dotpal::Error>(())
/// ```
pub mod prelude;

/// Configuration of a [`Pal`] instance, with presets and builder methods.
pub mod config;

/// The virtual memory reservation/commit engine (`VirtualAlloc`, `VirtualFree`,
/// `VirtualProtect`, `VirtualQuery`).
pub mod memory;

/// Heap allocation (`HeapCreate`, `HeapAlloc`, `HeapReAlloc`, `HeapFree`, `HeapSize`).
pub mod heap;

/// The process environment store.
pub mod environment;

/// Thread-local storage slots (`TlsAlloc`, `TlsFree`, `TlsGetValue`, `TlsSetValue`).
pub mod tls;

/// The per-thread last-error state (`GetLastError`, `SetLastError`).
pub mod lasterror;

/// Read-only memory-mapped images.
pub mod mapped;

/// `Interlocked*` atomic primitives.
pub mod interlocked;

/// Recursive critical sections.
pub mod critsec;

/// Win32-shaped, sentinel-returning entry points over [`Pal::global`].
pub mod win32;

/// `dotpal` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`]. Used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpal` Error type
///
/// The main error type for all operations in this crate. See [`Error::code`] for the Win32
/// error number each variant reports.
pub use error::{Error, ErrorCode};

/// The process context and its configuration.
pub use config::PalConfig;
pub use context::Pal;

/// Per-thread error state accessors.
pub use lasterror::{get_last_error, set_last_error};

/// Recursive lock used by serialized heaps.
pub use critsec::{CriticalSection, CriticalSectionGuard};
