//! Configuration of a [`Pal`](crate::Pal) instance.
//!
//! Configuration is organized into one top-level container and a sub-configuration per
//! component:
//!
//! - [`PalConfig`] - Top-level configuration container
//! - [`EnvironmentConfig`] - Initial environment contents and name matching
//! - [`MemoryConfig`] - Virtual memory engine settings
//! - [`HeapConfig`] - Process heap settings
//! - [`TlsConfig`] - TLS slot table size
//!
//! # Configuration Presets
//!
//! - [`PalConfig::inherit()`] - Start from the host process environment (the default)
//! - [`PalConfig::isolated()`] - Start from an empty environment, used by tests
//!
//! # Example
//!
//! ```rust
//! use dotpal::config::{EnvironmentConfig, PalConfig, TlsConfig};
//!
//! let config = PalConfig::isolated()
//!     .with_environment(EnvironmentConfig::custom([("HOME", "/root")]))
//!     .with_tls(TlsConfig::new().with_capacity(128));
//! config.validate()?;
//! # Ok::<(), dotpal::Error>(())
//! ```

use crate::{
    memory::{self, DEFAULT_ALLOCATION_GRANULARITY},
    tls::TLS_MINIMUM_AVAILABLE,
    Error, Result,
};

/// Complete configuration of a [`Pal`](crate::Pal).
///
/// # Default Configuration
///
/// - environment inherited from the host process, names compared case-sensitively
/// - 64 KiB allocation granularity
/// - unbounded, non-zeroing process heap
/// - 1088 TLS slots
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PalConfig {
    /// Environment store settings.
    pub environment: EnvironmentConfig,

    /// Virtual memory engine settings.
    pub memory: MemoryConfig,

    /// Process heap settings.
    pub heap: HeapConfig,

    /// TLS slot table settings.
    pub tls: TlsConfig,
}

impl PalConfig {
    /// Configuration that inherits the host environment.
    #[must_use]
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Configuration that starts from an empty environment.
    ///
    /// Nothing from the host process leaks into an instance built this way, which makes it the
    /// preset of choice for tests.
    #[must_use]
    pub fn isolated() -> Self {
        PalConfig {
            environment: EnvironmentConfig {
                source: EnvironmentSource::Empty,
                ..EnvironmentConfig::default()
            },
            ..Self::default()
        }
    }

    /// Replaces the environment settings.
    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentConfig) -> Self {
        self.environment = environment;
        self
    }

    /// Replaces the virtual memory settings.
    #[must_use]
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Replaces the process heap settings.
    #[must_use]
    pub fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }

    /// Replaces the TLS settings.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Checks the configuration for values the components cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the TLS capacity is below
    /// [`TLS_MINIMUM_AVAILABLE`], or the allocation granularity is not a power of two of at least
    /// one page.
    pub fn validate(&self) -> Result<()> {
        if self.tls.capacity < TLS_MINIMUM_AVAILABLE {
            return Err(Error::InvalidParameter(
                "TLS capacity must be at least 64 slots",
            ));
        }

        let granularity = self.memory.allocation_granularity;
        if !granularity.is_power_of_two() || granularity < memory::page_size() {
            return Err(Error::InvalidParameter(
                "allocation granularity must be a power of two of at least one page",
            ));
        }

        if self.heap.maximum_size == Some(0) {
            return Err(Error::InvalidParameter("heap maximum size is zero"));
        }

        Ok(())
    }
}

/// Where the initial environment comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EnvironmentSource {
    /// Copy the host process environment at construction.
    #[default]
    Inherit,
    /// Start with no variables.
    Empty,
    /// Start with the given `(name, value)` pairs.
    Custom(Vec<(String, String)>),
}

/// Environment store settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Initial contents.
    pub source: EnvironmentSource,

    /// Compare variable names without regard to ASCII case.
    ///
    /// Defaults to `false` on POSIX hosts.
    pub case_insensitive: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            source: EnvironmentSource::Inherit,
            case_insensitive: cfg!(windows),
        }
    }
}

impl EnvironmentConfig {
    /// Settings that start from the given variables.
    #[must_use]
    pub fn custom<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvironmentConfig {
            source: EnvironmentSource::Custom(
                entries
                    .into_iter()
                    .map(|(name, value)| (name.into(), value.into()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Sets whether names are compared without regard to ASCII case.
    #[must_use]
    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }
}

/// Virtual memory engine settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Alignment of hinted reservations.
    pub allocation_granularity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            allocation_granularity: DEFAULT_ALLOCATION_GRANULARITY,
        }
    }
}

impl MemoryConfig {
    /// Sets the alignment of hinted reservations.
    #[must_use]
    pub fn with_allocation_granularity(mut self, allocation_granularity: usize) -> Self {
        self.allocation_granularity = allocation_granularity;
        self
    }
}

/// Process heap settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapConfig {
    /// Zero-fill every allocation, as if `HEAP_ZERO_MEMORY` were always passed.
    pub zero_by_default: bool,

    /// Cap on the total size of live blocks.
    pub maximum_size: Option<usize>,
}

impl HeapConfig {
    /// Sets whether every allocation is zero-filled.
    #[must_use]
    pub fn with_zero_by_default(mut self, zero_by_default: bool) -> Self {
        self.zero_by_default = zero_by_default;
        self
    }

    /// Caps the total size of live blocks.
    #[must_use]
    pub fn with_maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }
}

/// TLS slot table settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    /// Number of slots; at least [`TLS_MINIMUM_AVAILABLE`].
    pub capacity: usize,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsConfig {
    /// Default settings: 64 guaranteed slots plus 1024 expansion slots.
    #[must_use]
    pub fn new() -> Self {
        TlsConfig {
            capacity: crate::tls::TLS_DEFAULT_CAPACITY,
        }
    }

    /// Sets the number of slots.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}
