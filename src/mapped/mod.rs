//! Read-only mapped images (`CreateFileMapping` / `MapViewOfFile`).
//!
//! A [`MappedImage`] exposes the bytes of a file or buffer through a [`Backend`], so that the
//! rest of the runtime can read headers and sections without caring whether the data lives in
//! a memory-mapped file or on the heap.
//!
//! # Key Components
//!
//! - [`Backend`] - Bounds-checked access to the underlying bytes
//! - [`FileView`] - A `memmap2` mapping of a whole file or a window of it
//! - [`MemoryBuffer`] - An owned in-memory buffer
//! - [`ImageFormat`] - Container format identified from the first bytes
//!
//! # Example
//!
//! ```rust
//! use dotpal::mapped::{ImageFormat, MappedImage};
//!
//! let mut elf = vec![0u8; 64];
//! elf[..4].copy_from_slice(b"\x7FELF");
//! elf[4] = 2; // 64-bit
//! elf[5] = 1; // little endian
//!
//! let image = MappedImage::from_mem(elf)?;
//! assert_eq!(image.format(), ImageFormat::Elf);
//! assert_eq!(image.data_slice(0, 4)?, b"\x7FELF");
//! # Ok::<(), dotpal::Error>(())
//! ```

mod file;
mod memory;

pub use file::FileView;
pub use memory::MemoryBuffer;

use std::{fmt, path::Path};

use goblin::Hint;
use log::debug;
use strum::Display;

use crate::{Error, Result};

/// Backend trait for mapped data sources.
///
/// This trait abstracts over the storage of a mapped image so that [`MappedImage`] can be built
/// from files and from in-memory buffers alike. Implementations must be `Send + Sync`: a mapped
/// image is read concurrently by every thread of the runtime.
pub trait Backend: Send + Sync {
    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data
    /// * `len` - The length of the slice in bytes
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the requested range leaves the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.data();
        let end = offset.checked_add(len).ok_or(Error::OutOfBounds)?;
        data.get(offset..end).ok_or(Error::OutOfBounds)
    }

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the backend holds no data.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Container format of a mapped image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ImageFormat {
    /// Portable Executable (Windows, .NET assemblies)
    #[strum(serialize = "PE")]
    Pe,
    /// Executable and Linkable Format
    #[strum(serialize = "ELF")]
    Elf,
    /// Mach-O, thin or fat
    #[strum(serialize = "Mach-O")]
    MachO,
    /// `ar` archive
    #[strum(serialize = "archive")]
    Archive,
    /// Anything else, including inputs shorter than 16 bytes
    #[strum(serialize = "unknown")]
    Unknown,
}

impl ImageFormat {
    /// Identifies the format from the first bytes of an image.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        let Some(magic) = data.get(..16).and_then(|head| <&[u8; 16]>::try_from(head).ok()) else {
            return ImageFormat::Unknown;
        };

        match goblin::peek_bytes(magic) {
            Ok(Hint::PE) => ImageFormat::Pe,
            Ok(Hint::Elf(_)) => ImageFormat::Elf,
            Ok(Hint::Mach(_) | Hint::MachFat(_)) => ImageFormat::MachO,
            Ok(Hint::Archive) => ImageFormat::Archive,
            Ok(_) | Err(_) => ImageFormat::Unknown,
        }
    }
}

/// A read-only view of a file or buffer.
pub struct MappedImage {
    backend: Box<dyn Backend>,
    format: ImageFormat,
}

impl MappedImage {
    /// Maps a whole file read-only.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be opened or mapped
    /// - [`Error::Empty`] if the file is empty
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let view = FileView::new(path)?;
        debug!("mapped {} ({} bytes)", path.display(), view.len());
        Ok(Self::from_backend(Box::new(view)))
    }

    /// Maps `len` bytes of a file starting at `offset` (`MapViewOfFile`).
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be opened or mapped
    /// - [`Error::OutOfBounds`] if the window leaves the file
    /// - [`Error::Empty`] if `len` is 0
    pub fn map_view(path: impl AsRef<Path>, offset: u64, len: usize) -> Result<Self> {
        let path = path.as_ref();
        let view = FileView::window(path, offset, len)?;
        debug!("mapped {}[0x{offset:X}..+0x{len:X}]", path.display());
        Ok(Self::from_backend(Box::new(view)))
    }

    /// Wraps an in-memory buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Empty);
        }
        Ok(Self::from_backend(Box::new(MemoryBuffer::new(data))))
    }

    /// Wraps any backend.
    #[must_use]
    pub fn from_backend(backend: Box<dyn Backend>) -> Self {
        let format = ImageFormat::detect(backend.data());
        MappedImage { backend, format }
    }

    /// Returns the container format identified when the image was mapped.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Returns the whole image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if the range leaves the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.backend.data_slice(offset, len)
    }

    /// Returns the image length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Returns `true` if the image holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

impl fmt::Debug for MappedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedImage")
            .field("format", &self.format)
            .field("len", &self.len())
            .finish()
    }
}
