//! The process-wide PAL context.
//!
//! [`Pal`] owns one instance of every stateful component: the environment store, the virtual
//! memory engine, the process heap and the TLS slot table. Components are reached through the
//! context instead of hidden globals, so tests can build as many isolated instances as they
//! like while the [`win32`](crate::win32) layer works against the single process-wide one.
//!
//! # Example
//!
//! ```rust
//! use dotpal::{Pal, PalConfig};
//!
//! let pal = Pal::new(PalConfig::isolated())?;
//! pal.environment().set_environment_variable("RUNTIME", Some("dotpal"))?;
//! assert_eq!(pal.environment().get("RUNTIME").as_deref(), Some("dotpal"));
//!
//! let index = pal.tls().alloc()?;
//! pal.tls().set_value(index, 7)?;
//! assert_eq!(pal.tls().get_value(index)?, 7);
//! # Ok::<(), dotpal::Error>(())
//! ```

use std::sync::OnceLock;

use log::{debug, info};

use crate::{
    config::PalConfig,
    environment::Environment,
    heap::{Heap, HeapFlags, HeapOptions},
    memory::VirtualMemory,
    tls::TlsTable,
    Error, Result,
};

static GLOBAL: OnceLock<Pal> = OnceLock::new();

/// A complete PAL instance.
#[derive(Debug)]
pub struct Pal {
    config: PalConfig,
    environment: Environment,
    virtual_memory: VirtualMemory,
    process_heap: Heap,
    tls: TlsTable,
}

impl Pal {
    /// Builds an instance that is independent of the process-wide one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` fails [`PalConfig::validate`].
    pub fn new(config: PalConfig) -> Result<Pal> {
        config.validate()?;

        let mut heap_flags = HeapFlags::NO_SERIALIZE;
        if config.heap.zero_by_default {
            heap_flags |= HeapFlags::ZERO_MEMORY;
        }
        let process_heap = Heap::new(HeapOptions {
            flags: heap_flags,
            maximum_size: config.heap.maximum_size,
        });

        let pal = Pal {
            environment: Environment::from_config(&config.environment),
            virtual_memory: VirtualMemory::new(config.memory.allocation_granularity)?,
            process_heap,
            tls: TlsTable::new(config.tls.capacity)?,
            config,
        };
        debug!(
            "PAL instance created: {} environment variables, {} TLS slots",
            pal.environment.len(),
            pal.tls.capacity()
        );
        Ok(pal)
    }

    /// Installs the process-wide instance.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if the process-wide instance already exists
    /// - any error of [`Pal::new`]
    pub fn initialize(config: PalConfig) -> Result<&'static Pal> {
        let pal = Pal::new(config)?;

        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            pal
        });
        if !installed {
            return Err(Error::InvalidParameter("PAL is already initialized"));
        }

        info!("PAL initialized");
        Ok(global)
    }

    /// Returns the process-wide instance, creating it with the default configuration on first
    /// use.
    pub fn global() -> &'static Pal {
        GLOBAL.get_or_init(|| {
            info!("PAL initialized with the default configuration");
            Pal::with_defaults()
        })
    }

    /// Returns the process-wide instance if it exists.
    #[must_use]
    pub fn try_global() -> Option<&'static Pal> {
        GLOBAL.get()
    }

    /// Returns the configuration the instance was built with.
    #[must_use]
    pub fn config(&self) -> &PalConfig {
        &self.config
    }

    /// Returns the environment store.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Returns the virtual memory engine.
    #[must_use]
    pub fn virtual_memory(&self) -> &VirtualMemory {
        &self.virtual_memory
    }

    /// Returns the process heap.
    #[must_use]
    pub fn process_heap(&self) -> &Heap {
        &self.process_heap
    }

    /// Returns the TLS slot table.
    #[must_use]
    pub fn tls(&self) -> &TlsTable {
        &self.tls
    }

    fn with_defaults() -> Pal {
        let config = PalConfig::default();
        Pal {
            environment: Environment::from_config(&config.environment),
            virtual_memory: VirtualMemory::default(),
            process_heap: Heap::new(HeapOptions::process()),
            tls: TlsTable::default(),
            config,
        }
    }
}
