//! # dotpal Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from the dotpal
//! library. Import this module to get quick access to the process context, every component
//! and their flag types.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpal operations
pub use crate::Error;

/// Win32 error numbers as stored in the per-thread error state
pub use crate::ErrorCode;

/// The result type used throughout dotpal
pub use crate::Result;

/// Per-thread error state accessors
pub use crate::lasterror::{get_last_error, set_last_error};

// ================================================================================================
// Process Context and Configuration
// ================================================================================================

/// The PAL instance owning every component
pub use crate::Pal;

/// Configuration containers and presets
pub use crate::config::{
    EnvironmentConfig, EnvironmentSource, HeapConfig, MemoryConfig, PalConfig, TlsConfig,
};

// ================================================================================================
// Virtual Memory
// ================================================================================================

/// The reservation/commit engine and its flag types
pub use crate::memory::{
    AllocationType, FreeType, MemoryBasicInformation, MemoryState, Protection, VirtualMemory,
};

// ================================================================================================
// Heaps, Environment and TLS
// ================================================================================================

/// Heap allocation
pub use crate::heap::{Heap, HeapFlags, HeapOptions};

/// Environment store
pub use crate::environment::{EnvLookup, Environment};

/// Thread-local storage
pub use crate::tls::{TlsIndex, TlsTable};

// ================================================================================================
// Mapped Images and Synchronization
// ================================================================================================

/// Memory-mapped images
pub use crate::mapped::{Backend, ImageFormat, MappedImage};

/// Recursive locking
pub use crate::critsec::{CriticalSection, CriticalSectionGuard};
