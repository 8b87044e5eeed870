//! Memory-mapped model files.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::LoadError;

/// A read-only memory map of a model file.
///
/// The mapped region remains valid for the lifetime of this struct.
/// Dropping it unmaps the file.
pub struct MappedFile {
    mmap: Mmap,
}

impl MappedFile {
    /// Map a file into memory.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let io_err = |source| LoadError::Io {
            path: path.display().to_string(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        if file.metadata().map_err(io_err)?.len() == 0 {
            return Err(LoadError::Truncated(format!("{} is empty", path.display())));
        }

        // Safety: model files are treated as read-only and are not modified
        // while the server runs.
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;

        Ok(Self { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Bytes `[offset, offset + len)`, or `None` past the end of the file.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.mmap.get(offset..end)
    }

    pub fn size(&self) -> usize {
        self.mmap.len()
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("size", &self.size()).finish()
    }
}
