//! # Lazy loading
//!
//! Pages declared by [`VmContext::register_mapping`] are not populated until
//! the first fault on them. Each SPT record holds a handle to an
//! [`MmLoader`], which knows how to produce the page's initial contents:
//!
//! - [`AnonLoader`] supplies zero-filled pages (stack growth, anonymous
//!   mappings).
//! - [`FileBackedLoader`] reads the page from a [`BackingFile`] (executable
//!   segments, memory-mapped files) and zero-fills whatever lies past the
//!   end of the mapped bytes.
//!
//! Once a page has been resident, its contents live in memory or in swap,
//! and the loader is only consulted again to write a modified page back to
//! its file when a shared mapping is torn down.
//!
//! [`VmContext::register_mapping`]: crate::VmContext::register_mapping

use crate::{PAGE_SIZE, Va, VmError};
use alloc::sync::Arc;

/// A file that pages can be loaded from and written back to.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at `pos`, returning the number of bytes
    /// read. Returns 0 at end of file.
    fn read_at(&self, pos: usize, buf: &mut [u8]) -> Result<usize, VmError>;
    /// Writes `buf` at `pos`, returning the number of bytes written.
    fn write_at(&self, pos: usize, buf: &[u8]) -> Result<usize, VmError>;
    /// The size of the file in bytes.
    fn size(&self) -> usize;
}

/// A trait for loading the contents of a virtual memory page on demand.
pub trait MmLoader
where
    Self: Send + Sync,
{
    /// Fills `buf` with the contents of the page at `addr`.
    ///
    /// `addr` is page aligned and lies within the region associated with
    /// this loader.
    fn load(&self, addr: Va, buf: &mut [u8; PAGE_SIZE]) -> Result<(), VmError>;

    /// Persists a modified page back to its source.
    ///
    /// The default implementation discards the contents, which is right for
    /// anonymous memory and private mappings.
    fn write_back(&self, _addr: Va, _buf: &[u8; PAGE_SIZE]) -> Result<(), VmError> {
        Ok(())
    }
}

/// A loader for anonymous memory regions.
pub struct AnonLoader {}

impl MmLoader for AnonLoader {
    fn load(&self, _addr: Va, buf: &mut [u8; PAGE_SIZE]) -> Result<(), VmError> {
        buf.fill(0);
        Ok(())
    }
}

/// A loader for file-backed memory regions.
///
/// The region starts at virtual address `base` and maps `length` bytes of
/// `file` starting at byte `offset`. Page `base + n * PAGE_SIZE` holds file
/// bytes `offset + n * PAGE_SIZE ..`, cut at `length` and at end of file;
/// everything after that is zero.
pub struct FileBackedLoader {
    file: Arc<dyn BackingFile>,
    base: Va,
    offset: usize,
    length: usize,
    shared: bool,
}

impl FileBackedLoader {
    /// Creates a loader for a private mapping, such as an executable
    /// segment. Modifications are never written back.
    pub fn private(file: Arc<dyn BackingFile>, base: Va, offset: usize, length: usize) -> Self {
        Self {
            file,
            base,
            offset,
            length,
            shared: false,
        }
    }

    /// Creates a loader for a shared file mapping. Modified pages are
    /// written back to the file when the mapping is removed.
    pub fn shared(file: Arc<dyn BackingFile>, base: Va, offset: usize, length: usize) -> Self {
        Self {
            shared: true,
            ..Self::private(file, base, offset, length)
        }
    }

    // (file position, bytes of this page backed by the file). The file
    // range of the page must be addressable.
    fn extent(&self, addr: Va) -> Result<(usize, usize), VmError> {
        let rel = addr.page_down() - self.base;
        let len = self.length.saturating_sub(rel).min(PAGE_SIZE);
        let pos = self
            .offset
            .checked_add(rel)
            .filter(|pos| pos.checked_add(len).is_some())
            .ok_or(VmError::InvalidArgument)?;
        Ok((pos, len))
    }
}

impl MmLoader for FileBackedLoader {
    fn load(&self, addr: Va, buf: &mut [u8; PAGE_SIZE]) -> Result<(), VmError> {
        buf.fill(0);
        let (pos, len) = self.extent(addr)?;
        let mut done = 0;
        while done < len {
            match self.file.read_at(pos + done, &mut buf[done..len])? {
                0 => break,
                n => done += n,
            }
        }
        Ok(())
    }

    fn write_back(&self, addr: Va, buf: &[u8; PAGE_SIZE]) -> Result<(), VmError> {
        if !self.shared {
            return Ok(());
        }
        let (pos, len) = self.extent(addr)?;
        // Never extend the file.
        let len = len.min(self.file.size().saturating_sub(pos));
        let mut done = 0;
        while done < len {
            match self.file.write_at(pos + done, &buf[done..len])? {
                0 => return Err(VmError::IOError),
                n => done += n,
            }
        }
        Ok(())
    }
}
