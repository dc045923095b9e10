//! Swap manager.
//!
//! The swap device is split into fixed-size slots, one page each. Slot `n`
//! occupies sectors `8n .. 8n + 8`. Slots hold raw page bytes without any
//! header; the in-memory slot table is the only record of which page a slot
//! belongs to and is lost on restart.
//!
//! Slots are handed out in two phases. While the device still has slots
//! that were never written, the next one in order is used. After that, the
//! lowest-numbered slot explicitly marked [`SlotState::Free`] is reused.

use crate::{PAGE_SIZE, PageKey, Pid, VmError};
use alloc::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    vec::Vec,
};
use machine::dev::{BlockOps, SECTOR_SIZE, Sector};

/// Sectors per swap slot.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// Index of a swap slot.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub usize);

impl SwapSlot {
    /// The first sector of this slot.
    pub fn first_sector(self) -> Sector {
        Sector(self.0 * SECTORS_PER_SLOT)
    }
}

/// Ownership state of a swap slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// The slot holds no live page.
    Free,
    /// The slot holds the contents of this page.
    Owned(PageKey),
}

/// Registry of swap slots.
pub struct SwapManager {
    disk: Arc<dyn BlockOps>,
    capacity: usize,
    // Slots that have been handed out at least once. Index == slot number.
    slots: Vec<SlotState>,
    free: BTreeSet<usize>,
    by_owner: BTreeMap<PageKey, SwapSlot>,
}

impl SwapManager {
    /// Creates a swap manager over `disk`. A trailing partial slot is not
    /// used.
    pub fn new(disk: Arc<dyn BlockOps>) -> Self {
        let capacity = disk.block_cnt() / SECTORS_PER_SLOT;
        log::info!(
            "swap: {} slots ({} KiB)",
            capacity,
            capacity * PAGE_SIZE / 1024
        );
        Self {
            disk,
            capacity,
            slots: Vec::new(),
            free: BTreeSet::new(),
            by_owner: BTreeMap::new(),
        }
    }

    fn pick_slot(&self) -> Option<usize> {
        if self.slots.len() < self.capacity {
            Some(self.slots.len())
        } else {
            self.free.first().copied()
        }
    }

    /// Writes a page owned by `owner` to a free slot.
    ///
    /// # Errors
    /// - [`VmError::NoSpace`] if every slot is owned.
    /// - [`VmError::IOError`] if the device fails. No slot is consumed.
    ///
    /// # Panics
    /// Panics if `owner` already owns a slot.
    pub fn write_out(
        &mut self,
        owner: PageKey,
        contents: &[u8; PAGE_SIZE],
    ) -> Result<SwapSlot, VmError> {
        assert!(
            !self.by_owner.contains_key(&owner),
            "swap: {owner} is already swapped out"
        );
        let index = self.pick_slot().ok_or_else(|| {
            log::error!("swap: no free slot for {owner}");
            VmError::NoSpace
        })?;
        let slot = SwapSlot(index);
        for (i, chunk) in contents.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = slot.first_sector() + i;
            let chunk: &[u8; SECTOR_SIZE] = chunk.try_into().map_err(|_| VmError::IOError)?;
            self.disk.write(sector, chunk).map_err(|e| {
                log::error!("swap: writing {sector:?} failed: {e:?}");
                VmError::from(e)
            })?;
        }
        if index == self.slots.len() {
            self.slots.push(SlotState::Owned(owner));
        } else {
            debug_assert_eq!(self.slots[index], SlotState::Free);
            self.free.remove(&index);
            self.slots[index] = SlotState::Owned(owner);
        }
        self.by_owner.insert(owner, slot);
        log::debug!("swap: {owner} -> {slot:?}");
        Ok(slot)
    }

    /// Reads the page owned by `owner` into `dest` and frees its slot.
    ///
    /// # Errors
    /// - [`VmError::NoSuchEntry`] if `owner` has no slot.
    /// - [`VmError::IOError`] if the device fails. The slot stays owned.
    pub fn read_in(
        &mut self,
        owner: PageKey,
        dest: &mut [u8; PAGE_SIZE],
    ) -> Result<SwapSlot, VmError> {
        let slot = self.peek(owner, dest)?;
        self.mark_free(owner, slot);
        log::debug!("swap: {slot:?} -> {owner}");
        Ok(slot)
    }

    /// Reads the page owned by `owner` into `dest` without freeing its slot.
    pub fn peek(&self, owner: PageKey, dest: &mut [u8; PAGE_SIZE]) -> Result<SwapSlot, VmError> {
        let slot = self.lookup_by_owner(owner).ok_or(VmError::NoSuchEntry)?;
        for (i, chunk) in dest.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector = slot.first_sector() + i;
            let chunk: &mut [u8; SECTOR_SIZE] =
                chunk.try_into().map_err(|_| VmError::IOError)?;
            self.disk.read(sector, chunk).map_err(|e| {
                log::error!("swap: reading {sector:?} failed: {e:?}");
                VmError::from(e)
            })?;
        }
        Ok(slot)
    }

    fn mark_free(&mut self, owner: PageKey, slot: SwapSlot) {
        self.by_owner.remove(&owner);
        self.slots[slot.0] = SlotState::Free;
        self.free.insert(slot.0);
    }

    /// Frees the slot owned by `owner` without reading it.
    pub fn release(&mut self, owner: PageKey) -> Option<SwapSlot> {
        let slot = self.lookup_by_owner(owner)?;
        self.mark_free(owner, slot);
        Some(slot)
    }

    /// Frees every slot owned by `pid`. Returns how many were freed.
    pub fn release_all(&mut self, pid: Pid) -> usize {
        let owned: Vec<(PageKey, SwapSlot)> = self
            .by_owner
            .range(PageKey::first_of(pid)..)
            .take_while(|(k, _)| k.pid == pid)
            .map(|(k, s)| (*k, *s))
            .collect();
        for (owner, slot) in owned.iter() {
            self.mark_free(*owner, *slot);
        }
        owned.len()
    }

    /// The slot owned by `owner`.
    pub fn lookup_by_owner(&self, owner: PageKey) -> Option<SwapSlot> {
        self.by_owner.get(&owner).copied()
    }

    /// The state of `slot`, or `None` if the slot is beyond the device.
    pub fn slot_state(&self, slot: SwapSlot) -> Option<SlotState> {
        if slot.0 >= self.capacity {
            None
        } else {
            Some(self.slots.get(slot.0).copied().unwrap_or(SlotState::Free))
        }
    }

    /// Iterates over owned slots.
    pub fn owned(&self) -> impl Iterator<Item = (PageKey, SwapSlot)> + '_ {
        self.by_owner.iter().map(|(k, s)| (*k, *s))
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots not owned by any page.
    pub fn free_slots(&self) -> usize {
        self.capacity - self.by_owner.len()
    }
}
