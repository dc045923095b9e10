//! Frame table: physical frame → owning page.
//!
//! One record exists per resident page. The table keeps two indices over
//! the same records so that both "who owns this frame?" (eviction) and
//! "which frame backs this page?" (unmap, exit) are logarithmic lookups.

use crate::{Pa, PageKey, Pid};
use alloc::collections::BTreeMap;

/// Registry of resident frames.
#[derive(Default)]
pub struct FrameTable {
    by_frame: BTreeMap<Pa, PageKey>,
    by_owner: BTreeMap<PageKey, Pa>,
}

impl FrameTable {
    /// Creates an empty frame table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `owner` as the occupant of `frame`, replacing any previous
    /// record for either the frame or the owner.
    pub fn record(&mut self, frame: Pa, owner: PageKey) {
        if let Some(prev) = self.by_frame.insert(frame, owner) {
            self.by_owner.remove(&prev);
        }
        match self.by_owner.insert(owner, frame) {
            Some(prev) if prev != frame => {
                self.by_frame.remove(&prev);
            }
            _ => (),
        }
    }

    /// Removes the record owned by `owner` and returns its frame.
    ///
    /// # Panics
    /// Panics if `owner` holds no frame. Callers only release pages they
    /// know to be resident, so a miss means the tables disagree.
    #[track_caller]
    pub fn release(&mut self, owner: PageKey) -> Pa {
        let Some(frame) = self.by_owner.remove(&owner) else {
            panic!("frame table: no frame is owned by {owner}");
        };
        self.by_frame.remove(&frame);
        frame
    }

    /// Returns the owner of `frame`.
    pub fn lookup_by_frame(&self, frame: Pa) -> Option<PageKey> {
        self.by_frame.get(&frame).copied()
    }

    /// Returns the frame owned by `owner`.
    pub fn lookup_by_owner(&self, owner: PageKey) -> Option<Pa> {
        self.by_owner.get(&owner).copied()
    }

    /// Frames owned by `pid`, in address order.
    pub fn frames_of(&self, pid: Pid) -> impl Iterator<Item = (PageKey, Pa)> + '_ {
        self.by_owner
            .range(PageKey::first_of(pid)..)
            .take_while(move |(k, _)| k.pid == pid)
            .map(|(k, pa)| (*k, *pa))
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = (Pa, PageKey)> + '_ {
        self.by_frame.iter().map(|(pa, k)| (*pa, *k))
    }

    /// Number of resident frames.
    pub fn len(&self) -> usize {
        self.by_frame.len()
    }

    /// Returns true if no frame is resident.
    pub fn is_empty(&self) -> bool {
        self.by_frame.is_empty()
    }
}
