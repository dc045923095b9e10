//! Supplemental page table.
//!
//! The SPT records, for every declared page of every process, where the
//! page's data lives when it is not mapped: the resident frame if any, the
//! lazy-load source, and the mapping it belongs to. A page with no SPT record
//! is unbacked; touching it is either stack growth or a fatal fault.
//!
//! Records are indexed by [`PageKey`]. Eviction order is kept separately by
//! the [`EvictionPolicy`](crate::eviction::EvictionPolicy), which the
//! context notifies whenever a record becomes resident.

use crate::{
    MappingId, Pa, PageKey, Pid, frame_table::FrameTable, loader::MmLoader,
    page_dir::Permission,
};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

/// A supplemental page table record.
#[derive(Clone)]
pub struct PageEntry {
    /// The frame holding the page, or `None` if the page is not resident.
    pub frame: Option<Pa>,
    /// The mmap region this page belongs to.
    pub mapping: Option<MappingId>,
    /// Where the page's initial contents come from.
    pub loader: Arc<dyn MmLoader>,
    /// Permission to install when the page becomes resident.
    pub perm: Permission,
    /// The page was written while resident at some point, so its contents
    /// may differ from its loader's.
    pub dirty: bool,
}

impl PageEntry {
    /// A non-resident record.
    pub fn lazy(loader: Arc<dyn MmLoader>, perm: Permission, mapping: Option<MappingId>) -> Self {
        Self {
            frame: None,
            mapping,
            loader,
            perm,
            dirty: false,
        }
    }

    /// Returns true if the page is resident.
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }
}

/// The supplemental page table of all processes.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: BTreeMap<PageKey, PageEntry>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites the record for `key`.
    ///
    /// When `entry` carries a frame, the frame is registered in `frames` as
    /// owned by `key`. Returns the previous record, if any.
    pub fn insert(
        &mut self,
        frames: &mut FrameTable,
        key: PageKey,
        entry: PageEntry,
    ) -> Option<PageEntry> {
        if let Some(frame) = entry.frame {
            frames.record(frame, key);
        }
        self.entries.insert(key, entry)
    }

    /// Marks the page at `key` resident in `frame`.
    ///
    /// # Panics
    /// Panics if no record exists for `key`.
    #[track_caller]
    pub fn set_frame(&mut self, frames: &mut FrameTable, key: PageKey, frame: Pa) {
        let Some(entry) = self.entries.get_mut(&key) else {
            panic!("spt: no record for {key}");
        };
        entry.frame = Some(frame);
        frames.record(frame, key);
    }

    /// Drops the frame pointer of `key` and its frame record, returning the
    /// frame the page occupied. Used on eviction.
    ///
    /// # Panics
    /// Panics if `key` has no record or is not resident.
    #[track_caller]
    pub fn clear(&mut self, frames: &mut FrameTable, key: PageKey) -> Pa {
        let Some(entry) = self.entries.get_mut(&key) else {
            panic!("spt: clearing {key}, which has no record");
        };
        let Some(frame) = entry.frame.take() else {
            panic!("spt: clearing {key}, which is not resident");
        };
        let released = frames.release(key);
        assert_eq!(
            released, frame,
            "spt: {key} points at {frame:?} but the frame table says {released:?}"
        );
        frame
    }

    /// Remembers that the page at `key` has been modified.
    pub fn mark_dirty(&mut self, key: PageKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.dirty = true;
        }
    }

    /// Looks up the record of `key`.
    pub fn lookup(&self, key: PageKey) -> Option<&PageEntry> {
        self.entries.get(&key)
    }

    /// Destroys the record of `key`, releasing its frame record if the page
    /// is resident. The frame itself is not freed.
    pub fn remove(&mut self, frames: &mut FrameTable, key: PageKey) -> Option<PageEntry> {
        let entry = self.entries.remove(&key)?;
        if entry.frame.is_some() {
            frames.release(key);
        }
        Some(entry)
    }

    /// Returns true if any record lies in `[start, end)`.
    pub fn overlaps(&self, start: PageKey, end: PageKey) -> bool {
        self.entries.range(start..end).next().is_some()
    }

    /// Keys of all records of `pid`, in address order.
    pub fn keys_of(&self, pid: Pid) -> Vec<PageKey> {
        self.entries
            .range(PageKey::first_of(pid)..)
            .take_while(|(k, _)| k.pid == pid)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Keys of all records of `pid` that belong to `mapping`.
    pub fn keys_of_mapping(&self, pid: Pid, mapping: MappingId) -> Vec<PageKey> {
        self.entries
            .range(PageKey::first_of(pid)..)
            .take_while(|(k, _)| k.pid == pid)
            .filter(|(_, e)| e.mapping == Some(mapping))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = (&PageKey, &PageEntry)> {
        self.entries.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
