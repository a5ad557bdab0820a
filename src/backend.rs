//! Byte sources the reader can pull index and data ranges from: a
//! random-access, read-only view over either a memory-mapped file or an
//! in-memory buffer. No writer-side backend, since encoding is out of scope.

use std::fs::File;
use std::path::Path;

use memmap2::{Advice, Mmap};

use crate::errors::OmCoreError;

/// A source of bytes a reader can fetch ranges from, plus optional
/// prefetch hints for backends that benefit from them (a memory-mapped
/// file; not an in-memory buffer).
pub trait ByteSource {
    /// Length in bytes.
    fn count(&self) -> u64;
    fn needs_prefetch(&self) -> bool;
    fn prefetch(&self, offset: u64, count: u64);
    fn get_bytes(&self, offset: u64, count: u64) -> Result<&[u8], OmCoreError>;
}

fn check_bounds(total: u64, offset: u64, count: u64) -> Result<(), OmCoreError> {
    let end = offset.checked_add(count).ok_or_else(|| OmCoreError::OutOfBounds {
        reason: format!("offset {offset} + count {count} overflows"),
    })?;
    if end > total {
        return Err(OmCoreError::OutOfBounds {
            reason: format!("range {offset}..{end} exceeds source length {total}"),
        });
    }
    Ok(())
}

/// A read-only memory-mapped file.
pub struct MmapBackend {
    mmap: Mmap,
    file: File,
}

impl MmapBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OmCoreError> {
        let filename = path.as_ref().display().to_string();
        let file = File::open(path.as_ref()).map_err(|e| OmCoreError::CannotOpenFile {
            filename: filename.clone(),
            errno: e.raw_os_error().unwrap_or(0),
            error: e.to_string(),
        })?;
        Self::from_file(file, filename)
    }

    pub fn from_file(file: File, filename: String) -> Result<Self, OmCoreError> {
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| OmCoreError::CannotOpenFile {
            filename,
            errno: e.raw_os_error().unwrap_or(0),
            error: e.to_string(),
        })?;
        Ok(Self { mmap, file })
    }

    /// Checks whether the underlying file still has a name on disk. Linux
    /// keeps an open file's data alive even after its last directory entry
    /// is unlinked, so a long-lived reader can outlive the path it was
    /// opened from; the unlinked symlink target under `/proc/self/fd` gets
    /// a `(deleted)` suffix in that case.
    pub fn was_deleted(&self) -> bool {
        use std::os::fd::AsRawFd;
        std::fs::read_link(format!("/proc/self/fd/{}", self.file.as_raw_fd()))
            .map(|target| target.to_string_lossy().ends_with(" (deleted)"))
            .unwrap_or(false)
    }
}

impl ByteSource for MmapBackend {
    fn count(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn needs_prefetch(&self) -> bool {
        true
    }

    fn prefetch(&self, offset: u64, count: u64) {
        let page_size = 4096u64;
        let page_start = offset / page_size * page_size;
        let page_end = (offset + count).div_ceil(page_size) * page_size;
        let len = (page_end - page_start).min(self.mmap.len() as u64 - page_start) as usize;
        let _ = self
            .mmap
            .advise_range(Advice::WillNeed, page_start as usize, len);
    }

    fn get_bytes(&self, offset: u64, count: u64) -> Result<&[u8], OmCoreError> {
        check_bounds(self.count(), offset, count)?;
        Ok(&self.mmap[offset as usize..(offset + count) as usize])
    }
}

/// An in-memory byte buffer, mainly for tests and fixtures built without
/// touching the filesystem.
#[derive(Debug)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteSource for InMemoryBackend {
    fn count(&self) -> u64 {
        self.data.len() as u64
    }

    fn needs_prefetch(&self) -> bool {
        false
    }

    fn prefetch(&self, _offset: u64, _count: u64) {}

    fn get_bytes(&self, offset: u64, count: u64) -> Result<&[u8], OmCoreError> {
        check_bounds(self.count(), offset, count)?;
        Ok(&self.data[offset as usize..(offset + count) as usize])
    }
}
