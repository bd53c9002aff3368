//! Memory-mapped file backend.
//!
//! [`FileView`] maps a file, or a window of it, read-only with `memmap2`. Pages are brought in
//! by the kernel on first access, so mapping a large image is cheap until it is read.

use std::{fs, path::Path};

use memmap2::{Mmap, MmapOptions};

use super::Backend;
use crate::{Error, Result};

/// A read-only mapping of a file.
#[derive(Debug)]
pub struct FileView {
    data: Mmap,
    offset: u64,
}

impl FileView {
    /// Maps the whole file at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the file on disk
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or mapped, and [`Error::Empty`] for
    /// an empty file.
    pub fn new(path: impl AsRef<Path>) -> Result<FileView> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::Empty);
        }

        // SAFETY: the mapping is read-only; callers must not truncate the file while it is
        // mapped, the same contract MapViewOfFile places on its users.
        let data = unsafe { Mmap::map(&file) }?;
        Ok(FileView { data, offset: 0 })
    }

    /// Maps `len` bytes of the file at `path` starting at `offset`.
    ///
    /// The offset does not need to be page aligned.
    ///
    /// # Errors
    ///
    /// - [`Error::Empty`] if `len` is 0
    /// - [`Error::OutOfBounds`] if the window reaches past the end of the file
    /// - [`Error::Io`] if the file cannot be opened or mapped
    pub fn window(path: impl AsRef<Path>, offset: u64, len: usize) -> Result<FileView> {
        if len == 0 {
            return Err(Error::Empty);
        }

        let file = fs::File::open(path)?;
        let file_len = file.metadata()?.len();
        let end = u64::try_from(len)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .ok_or(Error::OutOfBounds)?;
        if end > file_len {
            return Err(Error::OutOfBounds);
        }

        // SAFETY: see `new`.
        let data = unsafe { MmapOptions::new().offset(offset).len(len).map(&file) }?;
        Ok(FileView { data, offset })
    }

    /// Returns the file offset the view starts at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Backend for FileView {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
