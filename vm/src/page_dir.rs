//! Per-process page directory.
//!
//! The page directory is the hardware-visible translation of a process: a
//! map from page-aligned virtual addresses to physical frames plus the
//! access bits. It is a flat ordered map rather than a 4-level radix tree,
//! since the virtual-memory core only needs to install, remove and inspect
//! leaf entries.

use crate::{Pa, Va};
use alloc::collections::BTreeMap;

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Flags of a leaf page-table entry.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes may not be allowed to the page.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed.
        const US = 1 << 2;
        /// Accessed; set when the page is read or written.
        const A = 1 << 5;
        /// Dirty; set when the page is written.
        const D = 1 << 6;
        /// Execute-disable.
        const XD = 1 << 63;
    }
}

impl From<Permission> for PteFlags {
    fn from(perm: Permission) -> Self {
        let mut flags = PteFlags::empty();
        if !perm.is_empty() {
            flags |= PteFlags::P;
        }
        if perm.contains(Permission::WRITE) {
            flags |= PteFlags::RW;
        }
        if perm.contains(Permission::USER) {
            flags |= PteFlags::US;
        }
        if !perm.contains(Permission::EXECUTABLE) {
            flags |= PteFlags::XD;
        }
        flags
    }
}

/// A leaf page-table entry: the mapped frame and its flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    /// The mapped frame.
    pub pa: Pa,
    /// The entry's flags.
    pub flags: PteFlags,
}

impl Pte {
    /// Returns true if user code may write through this entry.
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::RW)
    }
}

/// Errors from page directory operations.
#[derive(Debug, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// The virtual address or physical address is not page aligned.
    Unaligned,
    /// No entry is mapped at the address.
    NotExist,
    /// An entry is already mapped at the address.
    Duplicated,
    /// The permission does not make the page present.
    InvalidPermission,
}

/// The page directory of one process.
#[derive(Default)]
pub struct PageDirectory {
    entries: BTreeMap<Va, Pte>,
}

impl PageDirectory {
    /// Creates an empty page directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `va` to `pa` with `perm`.
    pub fn map(&mut self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError> {
        if !va.is_aligned() || pa.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        if !perm.contains(Permission::READ) {
            return Err(PageTableMappingError::InvalidPermission);
        }
        if self.entries.contains_key(&va) {
            return Err(PageTableMappingError::Duplicated);
        }
        self.entries.insert(
            va,
            Pte {
                pa,
                flags: perm.into(),
            },
        );
        Ok(())
    }

    /// Removes the mapping at `va`, returning the frame it pointed to.
    pub fn unmap(&mut self, va: Va) -> Result<Pa, PageTableMappingError> {
        if !va.is_aligned() {
            return Err(PageTableMappingError::Unaligned);
        }
        self.entries
            .remove(&va)
            .map(|pte| pte.pa)
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Looks up the entry of the page containing `va`.
    pub fn walk(&self, va: Va) -> Option<Pte> {
        self.entries.get(&va.page_down()).copied()
    }

    /// Records an access, as the MMU does on a successful translation.
    pub fn mark_accessed(&mut self, va: Va, write: bool) {
        if let Some(pte) = self.entries.get_mut(&va.page_down()) {
            pte.flags |= PteFlags::A;
            if write {
                pte.flags |= PteFlags::D;
            }
        }
    }

    /// Clears the accessed bit of `va`, returning its previous value.
    pub fn test_and_clear_accessed(&mut self, va: Va) -> bool {
        match self.entries.get_mut(&va.page_down()) {
            Some(pte) => {
                let was = pte.flags.contains(PteFlags::A);
                pte.flags.remove(PteFlags::A);
                was
            }
            None => false,
        }
    }

    /// Returns true if the page at `va` is mapped and has been written.
    pub fn is_dirty(&self, va: Va) -> bool {
        self.walk(va)
            .is_some_and(|pte| pte.flags.contains(PteFlags::D))
    }

    /// Iterates over all mappings in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Va, Pte)> + '_ {
        self.entries.iter().map(|(va, pte)| (*va, *pte))
    }

    /// Number of mapped pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
