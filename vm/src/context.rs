//! The virtual-memory context.
//!
//! [`VmContext`] owns every table of the subsystem and is the only entry
//! point used by the rest of the kernel. The tables live in a [`VmState`]
//! behind a single [`SpinLock`]; each public method takes the lock once and
//! releases it when done, so operations are linearizable with respect to
//! each other. Eviction, which touches every table and the swap device,
//! runs entirely inside the lock of the fault that triggered it.

use crate::{
    MappingId, PAGE_SIZE, Pa, PageKey, Pid, Va, VmConfig, VmError,
    eviction::{EvictionPolicy, new_policy},
    fault::{FAULT_EXIT_STATUS, FaultError, PageFaultReason, Resolution, Terminated, user_page},
    frame_table::FrameTable,
    loader::{AnonLoader, BackingFile, FileBackedLoader, MmLoader},
    page_dir::{Permission, Pte},
    process::ProcessDirectory,
    spt::{PageEntry, SupplementalPageTable},
    swap::{SlotState, SwapManager, SwapSlot},
};
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use machine::{
    addressing::USER_TOP, dev::BlockOps, interrupt::PFErrorCode, mm::PageAllocator,
    spinlock::SpinLock,
};

/// All tables of the virtual-memory subsystem.
///
/// Only reachable through the lock of a [`VmContext`].
pub struct VmState {
    frames: FrameTable,
    spt: SupplementalPageTable,
    swap: SwapManager,
    policy: Box<dyn EvictionPolicy>,
    procs: ProcessDirectory,
}

#[derive(Default)]
struct VmStats {
    page_faults: CachePadded<AtomicUsize>,
    lazy_loads: AtomicUsize,
    swap_ins: AtomicUsize,
    stack_growths: AtomicUsize,
    evictions: AtomicUsize,
    killed: AtomicUsize,
}

/// Counters of the virtual-memory subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Page faults delivered to the resolver.
    pub page_faults: usize,
    /// Pages loaded from their lazy-load source.
    pub lazy_loads: usize,
    /// Pages read back from swap.
    pub swap_ins: usize,
    /// Stack pages created by stack growth.
    pub stack_growths: usize,
    /// Pages evicted to swap.
    pub evictions: usize,
    /// Processes killed by a fatal fault.
    pub killed: usize,
}

/// A snapshot of one SPT record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    /// The frame holding the page, if resident.
    pub frame: Option<Pa>,
    /// The swap slot holding the page, if swapped out.
    pub swap_slot: Option<SwapSlot>,
    /// The mapping the page belongs to.
    pub mapping: Option<MappingId>,
    /// Whether user code may write the page.
    pub writable: bool,
}

/// A broken table invariant, reported by [`VmContext::verify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A resident SPT record has no matching frame record.
    MissingFrameRecord(PageKey, Pa),
    /// A frame record has no resident SPT record pointing back at it.
    OrphanFrameRecord(Pa, PageKey),
    /// A page is both resident and swapped out.
    ResidentAndSwapped(PageKey),
    /// A swap slot is owned by a page without a non-resident SPT record.
    OrphanSwapSlot(SwapSlot, PageKey),
    /// The page directory disagrees with the SPT about a page.
    MappingMismatch(PageKey),
    /// The eviction policy disagrees with the SPT about a page.
    PolicyMismatch(PageKey),
    /// The allocator and the frame table disagree about how many frames
    /// are in use.
    FrameLeak {
        /// Frames the allocator has handed out.
        allocated: usize,
        /// Frames recorded in the frame table.
        resident: usize,
    },
}

/// The virtual-memory context of the kernel.
pub struct VmContext {
    config: VmConfig,
    allocator: Arc<dyn PageAllocator>,
    state: SpinLock<VmState>,
    stats: VmStats,
}

impl VmContext {
    /// Creates a context that takes frames from `allocator` and swaps to
    /// `swap_device`.
    pub fn new(
        config: VmConfig,
        allocator: Arc<dyn PageAllocator>,
        swap_device: Arc<dyn BlockOps>,
    ) -> Self {
        log::info!(
            "vm: {} frames, {:?} eviction",
            allocator.capacity(),
            config.policy
        );
        Self {
            state: SpinLock::new(VmState {
                frames: FrameTable::new(),
                spt: SupplementalPageTable::new(),
                swap: SwapManager::new(swap_device),
                policy: new_policy(config.policy),
                procs: ProcessDirectory::new(),
            }),
            config,
            allocator,
            stats: VmStats::default(),
        }
    }

    /// The configuration of this context.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Registers a process whose stack grows down from `stack_top`.
    pub fn create_process(&self, pid: Pid, stack_top: Va) -> Result<(), VmError> {
        let mut s = self.state.lock();
        let r = s.procs.create(pid, stack_top).map(|_| ());
        s.unlock();
        if r.is_ok() {
            log::info!("vm: {pid} created, stack top {stack_top:?}");
        }
        r
    }

    /// Declares `length` bytes at `vpage` as lazily loaded.
    ///
    /// With `file`, page `vpage + n * PAGE_SIZE` is loaded from byte
    /// `offset + n * PAGE_SIZE` of the file; without, pages are zero-filled.
    /// A `mapping_id` makes the region a shared mapping whose modified pages
    /// are written back to the file when the mapping is removed or the
    /// process exits; without one the region is a private image segment.
    ///
    /// # Errors
    /// - [`VmError::InvalidArgument`] if `vpage` is null, unaligned, or not
    ///   a user address, if `length` is zero or runs past user space, or if
    ///   `offset + length` overflows.
    /// - [`VmError::NoSuchEntry`] if `pid` is not a live process.
    /// - [`VmError::AlreadyExists`] if any page of the range is already
    ///   declared.
    #[allow(clippy::too_many_arguments)]
    pub fn register_mapping(
        &self,
        pid: Pid,
        vpage: Va,
        file: Option<Arc<dyn BackingFile>>,
        offset: usize,
        length: usize,
        writable: bool,
        mapping_id: Option<MappingId>,
    ) -> Result<(), VmError> {
        if !vpage.is_user() || !vpage.is_aligned() || length == 0 {
            return Err(VmError::InvalidArgument);
        }
        if offset.checked_add(length).is_none() {
            return Err(VmError::InvalidArgument);
        }
        let end = vpage
            .into_usize()
            .checked_add(length)
            .filter(|end| *end <= USER_TOP)
            .and_then(Va::new)
            .ok_or(VmError::InvalidArgument)?
            .page_up();

        let mut perm = Permission::READ | Permission::USER;
        if writable {
            perm |= Permission::WRITE;
        }
        let loader: Arc<dyn MmLoader> = match (file, mapping_id) {
            (None, _) => Arc::new(AnonLoader {}),
            (Some(file), Some(_)) => {
                Arc::new(FileBackedLoader::shared(file, vpage, offset, length))
            }
            (Some(file), None) => {
                perm |= Permission::EXECUTABLE;
                Arc::new(FileBackedLoader::private(file, vpage, offset, length))
            }
        };

        let mut s = self.state.lock();
        if !s.procs.is_alive(pid) {
            return Err(VmError::NoSuchEntry);
        }
        if s.spt.overlaps(PageKey::new(pid, vpage), PageKey::new(pid, end)) {
            return Err(VmError::AlreadyExists);
        }
        let VmState { spt, frames, .. } = &mut *s;
        let mut va = vpage;
        while va < end {
            spt.insert(
                frames,
                PageKey::new(pid, va),
                PageEntry::lazy(loader.clone(), perm, mapping_id),
            );
            va += PAGE_SIZE;
        }
        s.unlock();
        log::debug!(
            "vm: {pid} declared {vpage:?}..{end:?} ({:?}, {})",
            mapping_id,
            if writable { "rw" } else { "ro" }
        );
        Ok(())
    }

    /// Removes every page of `mapping_id` from `pid`.
    ///
    /// Modified pages of shared file mappings are written back. Resident
    /// pages release their frames; swapped pages release their slots.
    /// Returns the number of pages removed.
    ///
    /// # Errors
    /// - [`VmError::NoSuchEntry`] if `pid` is not live or has no page of
    ///   `mapping_id`.
    /// - [`VmError::IOError`] if any page could not be written back. The
    ///   mapping is removed regardless.
    pub fn unregister_mapping(&self, pid: Pid, mapping_id: MappingId) -> Result<usize, VmError> {
        let mut s = self.state.lock();
        if !s.procs.is_alive(pid) {
            return Err(VmError::NoSuchEntry);
        }
        let keys = s.spt.keys_of_mapping(pid, mapping_id);
        if keys.is_empty() {
            return Err(VmError::NoSuchEntry);
        }
        let mut lost = 0;
        for key in keys.iter() {
            if self.drop_page(&mut s, *key, true).is_err() {
                lost += 1;
            }
        }
        s.unlock();
        log::debug!("vm: {pid} unmapped {mapping_id:?} ({} pages)", keys.len());
        if lost > 0 {
            log::error!("vm: {pid} lost {lost} modified pages of {mapping_id:?}");
            return Err(VmError::IOError);
        }
        Ok(keys.len())
    }

    /// Resolves a page fault of `pid` at `fault_addr`.
    ///
    /// Returns how the fault was resolved, after which the faulting
    /// instruction can be retried. If the fault is fatal, the process is
    /// terminated with exit status `-1` and its memory released before this
    /// returns [`Terminated`].
    ///
    /// A fault from a process that has already exited is not resolved; it
    /// returns [`Terminated`] with the recorded exit status and cause
    /// [`FaultError::Exited`], leaving every table untouched.
    ///
    /// # Panics
    /// Panics if `pid` was never created.
    pub fn handle_page_fault(
        &self,
        pid: Pid,
        fault_addr: usize,
        write: bool,
        user: bool,
        stack_pointer: usize,
    ) -> Result<Resolution, Terminated> {
        self.fault(
            pid,
            PageFaultReason {
                fault_addr,
                is_write_access: write,
                is_present: false,
                is_user: user,
                stack_pointer,
            },
        )
    }

    /// Resolves a page fault described by the raw error code and `cr2`.
    ///
    /// See [`handle_page_fault`](Self::handle_page_fault).
    pub fn page_fault(
        &self,
        pid: Pid,
        ec: PFErrorCode,
        cr2: usize,
        stack_pointer: usize,
    ) -> Result<Resolution, Terminated> {
        self.fault(pid, PageFaultReason::new(ec, cr2, stack_pointer))
    }

    fn fault(&self, pid: Pid, reason: PageFaultReason) -> Result<Resolution, Terminated> {
        let mut s = self.state.lock();
        let r = self.resolve_locked(&mut s, pid, &reason);
        s.unlock();
        r
    }

    // Runs the resolver and kills the process on failure. Lock held.
    fn resolve_locked(
        &self,
        s: &mut VmState,
        pid: Pid,
        reason: &PageFaultReason,
    ) -> Result<Resolution, Terminated> {
        self.stats.page_faults.fetch_add(1, Ordering::Relaxed);
        match s.procs.get(pid).map(|p| p.exit_status) {
            None => panic!("vm: page fault from unknown {pid}"),
            Some(Some(status)) => {
                log::debug!(
                    "vm: {pid} faulted at {:#x} after exiting with {status}",
                    reason.fault_addr
                );
                return Err(Terminated {
                    pid,
                    status,
                    fault_addr: reason.fault_addr,
                    cause: FaultError::Exited,
                });
            }
            Some(None) => (),
        }
        match self.resolve_fault(s, pid, reason) {
            Ok(resolution) => {
                let counter = match resolution {
                    Resolution::LazyLoad => &self.stats.lazy_loads,
                    Resolution::SwapIn => &self.stats.swap_ins,
                    Resolution::StackGrowth => &self.stats.stack_growths,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "vm: {pid} fault at {:#x} resolved by {resolution:?}",
                    reason.fault_addr
                );
                Ok(resolution)
            }
            Err(cause) => {
                log::warn!(
                    "vm: {pid} killed by page fault at {:#x} ({}, sp {:#x}): {cause:?}",
                    reason.fault_addr,
                    if reason.is_write_access { "write" } else { "read" },
                    reason.stack_pointer
                );
                self.teardown(s, pid, FAULT_EXIT_STATUS);
                self.stats.killed.fetch_add(1, Ordering::Relaxed);
                Err(Terminated {
                    pid,
                    status: FAULT_EXIT_STATUS,
                    fault_addr: reason.fault_addr,
                    cause,
                })
            }
        }
    }

    fn resolve_fault(
        &self,
        s: &mut VmState,
        pid: Pid,
        reason: &PageFaultReason,
    ) -> Result<Resolution, FaultError> {
        let page = user_page(reason.fault_addr)?;
        let key = PageKey::new(pid, page);
        let Some(proc) = s.procs.alive_mut(pid) else {
            panic!("vm: resolving a fault of {pid}, which is not running");
        };
        if proc.page_dir.walk(page).is_some() {
            return Err(FaultError::Protection);
        }
        let stack_top = proc.stack_top.into_usize();
        let sp = reason.stack_pointer;

        if self.config.reject_guard_page && sp.checked_sub(PAGE_SIZE) == Some(reason.fault_addr) {
            return Err(FaultError::StackGuard);
        }

        if let Some(entry) = s.spt.lookup(key) {
            assert!(
                !entry.is_resident(),
                "vm: {key} is resident in {:?} but not mapped",
                entry.frame
            );
            if reason.is_write_access && !entry.perm.contains(Permission::WRITE) {
                return Err(FaultError::Protection);
            }
            let (loader, perm) = (entry.loader.clone(), entry.perm);
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            let frame = self.acquire_frame(s)?;
            let how = if s.swap.lookup_by_owner(key).is_some() {
                s.swap.read_in(key, &mut buf).map(|_| Resolution::SwapIn)
            } else {
                loader.load(page, &mut buf).map(|_| Resolution::LazyLoad)
            };
            let how = match how {
                Ok(how) => how,
                Err(e) => {
                    self.allocator.deallocate(frame);
                    return Err(e.into());
                }
            };
            self.allocator.write_page(frame, &buf);
            self.install(s, key, frame, perm);
            return Ok(how);
        }

        let addr = reason.fault_addr;
        let is_stack = sp != 0
            && addr >= sp.saturating_sub(self.config.stack_growth_margin)
            && addr < stack_top
            && stack_top - page.into_usize() <= self.config.max_stack_size;
        if !is_stack {
            return Err(FaultError::Unbacked);
        }
        let frame = self.acquire_frame(s)?;
        self.allocator.write_page(frame, &[0; PAGE_SIZE]);
        let perm = Permission::READ | Permission::WRITE | Permission::USER;
        let VmState { spt, frames, .. } = &mut *s;
        spt.insert(frames, key, PageEntry::lazy(Arc::new(AnonLoader {}), perm, None));
        self.install(s, key, frame, perm);
        if let Some(proc) = s.procs.get_mut(pid) {
            proc.stack_end = proc.stack_end.min(page);
        }
        Ok(Resolution::StackGrowth)
    }

    // Maps `frame` for `key` and makes it resident in every table.
    fn install(&self, s: &mut VmState, key: PageKey, frame: Pa, perm: Permission) {
        let Some(proc) = s.procs.get_mut(key.pid) else {
            panic!("vm: installing {key} of unknown process");
        };
        if let Err(e) = proc.page_dir.map(key.va, frame, perm) {
            panic!("vm: mapping {key} to {frame:?} failed: {e:?}");
        }
        s.spt.set_frame(&mut s.frames, key, frame);
        s.policy.on_resident(key);
    }

    /// Returns a frame that no page owns, evicting one if memory is full.
    fn acquire_frame(&self, s: &mut VmState) -> Result<Pa, VmError> {
        match self.allocator.allocate() {
            Some(frame) => Ok(frame),
            None => self.evict_one(s),
        }
    }

    // Moves one resident page to swap and returns its frame. If the page
    // cannot be written out, every table is left as it was.
    fn evict_one(&self, s: &mut VmState) -> Result<Pa, VmError> {
        let VmState { policy, procs, .. } = &mut *s;
        let victim = policy
            .select_victim(&mut |key| {
                procs
                    .get_mut(key.pid)
                    .is_some_and(|p| p.page_dir.test_and_clear_accessed(key.va))
            })
            .ok_or_else(|| {
                log::error!("vm: out of frames and nothing to evict");
                VmError::NoMemory
            })?;

        let Some(frame) = s.spt.lookup(victim).and_then(|e| e.frame) else {
            panic!("vm: eviction victim {victim} is not resident");
        };
        if s.frames.lookup_by_frame(frame) != Some(victim) {
            panic!(
                "vm: eviction victim {victim} holds {frame:?}, owned by {:?}",
                s.frames.lookup_by_frame(frame)
            );
        }

        let mut buf = Box::new([0u8; PAGE_SIZE]);
        self.allocator.read_page(frame, &mut buf);
        if let Err(e) = s.swap.write_out(victim, &buf) {
            s.policy.reinstate(victim);
            return Err(e);
        }

        let Some(proc) = s.procs.get_mut(victim.pid) else {
            panic!("vm: eviction victim {victim} has no process");
        };
        let dirty = proc.page_dir.is_dirty(victim.va);
        match proc.page_dir.unmap(victim.va) {
            Ok(pa) if pa == frame => (),
            other => panic!("vm: eviction victim {victim} mapped as {other:?}, expected {frame:?}"),
        }
        if dirty {
            s.spt.mark_dirty(victim);
        }
        s.spt.clear(&mut s.frames, victim);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        log::debug!("vm: evicted {victim} from {frame:?}");
        Ok(frame)
    }

    // Destroys the record of `key`, writing it back first if it belongs to
    // a shared mapping and has been modified. The record is destroyed even
    // if the write-back fails.
    fn drop_page(&self, s: &mut VmState, key: PageKey, unmap: bool) -> Result<(), VmError> {
        let Some(entry) = s.spt.lookup(key).cloned() else {
            panic!("vm: dropping {key}, which has no record");
        };
        let dirty = entry.dirty
            || s
                .procs
                .get(key.pid)
                .is_some_and(|p| p.page_dir.is_dirty(key.va));
        let written = if entry.mapping.is_some() && dirty {
            self.write_back(s, key, &entry)
        } else {
            Ok(())
        };

        s.spt.remove(&mut s.frames, key);
        match entry.frame {
            Some(frame) => {
                if unmap {
                    if let Some(proc) = s.procs.get_mut(key.pid) {
                        let _ = proc.page_dir.unmap(key.va);
                    }
                }
                s.policy.on_release(key);
                self.allocator.deallocate(frame);
            }
            None => {
                s.swap.release(key);
            }
        }
        written
    }

    fn write_back(&self, s: &mut VmState, key: PageKey, entry: &PageEntry) -> Result<(), VmError> {
        let mut buf = Box::new([0u8; PAGE_SIZE]);
        let loaded = match entry.frame {
            Some(frame) => {
                self.allocator.read_page(frame, &mut buf);
                Ok(())
            }
            None => s.swap.peek(key, &mut buf).map(|_| ()),
        };
        loaded
            .and_then(|_| entry.loader.write_back(key.va, &buf))
            .map_err(|e| {
                log::error!("vm: writing back {key} failed: {e:?}");
                VmError::IOError
            })
    }

    // Releases all memory of `pid` and records its exit status. Lock held.
    fn teardown(&self, s: &mut VmState, pid: Pid, status: i32) {
        // An exiting process has nobody to report a lost write-back to;
        // write_back has logged it.
        for key in s.spt.keys_of(pid) {
            let _ = self.drop_page(s, key, false);
        }
        let slots = s.swap.release_all(pid);
        debug_assert_eq!(slots, 0, "vm: {pid} left swap slots without SPT records");
        if let Some(proc) = s.procs.get_mut(pid) {
            proc.page_dir.clear();
            proc.exit_status = Some(status);
        }
    }

    /// Terminates `pid` with `status`, releasing every frame, SPT record and
    /// swap slot it owns.
    pub fn exit_process(&self, pid: Pid, status: i32) -> Result<(), VmError> {
        let mut s = self.state.lock();
        if !s.procs.is_alive(pid) {
            return Err(VmError::NoSuchEntry);
        }
        self.teardown(&mut s, pid, status);
        s.unlock();
        log::info!("vm: {pid} exited with {status}");
        Ok(())
    }

    /// Copies user memory at `addr` into `buf`, as the MMU would on behalf
    /// of `pid`, faulting pages in as needed.
    pub fn read_user(
        &self,
        pid: Pid,
        addr: usize,
        buf: &mut [u8],
        stack_pointer: usize,
    ) -> Result<(), Terminated> {
        let len = buf.len();
        self.access_user(pid, addr, len, false, stack_pointer, |ofs, range, page| {
            let n = range.len();
            buf[range].copy_from_slice(&page[ofs..ofs + n]);
            false
        })
    }

    /// Copies `buf` into user memory at `addr`, as the MMU would on behalf
    /// of `pid`, faulting pages in as needed.
    pub fn write_user(
        &self,
        pid: Pid,
        addr: usize,
        buf: &[u8],
        stack_pointer: usize,
    ) -> Result<(), Terminated> {
        self.access_user(pid, addr, buf.len(), true, stack_pointer, |ofs, range, page| {
            let n = range.len();
            page[ofs..ofs + n].copy_from_slice(&buf[range]);
            true
        })
    }

    // Walks the pages of `[addr, addr + len)`. For each page, `f` gets the
    // offset into the page, the range of the caller's buffer, and the page
    // contents; it returns whether it modified the page.
    fn access_user(
        &self,
        pid: Pid,
        addr: usize,
        len: usize,
        write: bool,
        stack_pointer: usize,
        mut f: impl FnMut(usize, core::ops::Range<usize>, &mut [u8; PAGE_SIZE]) -> bool,
    ) -> Result<(), Terminated> {
        let mut s = self.state.lock();
        let mut done = 0;
        let mut page = Box::new([0u8; PAGE_SIZE]);
        while done < len {
            let cur = addr.wrapping_add(done);
            let ofs = cur & (PAGE_SIZE - 1);
            let chunk = (PAGE_SIZE - ofs).min(len - done);
            let reason = PageFaultReason {
                fault_addr: cur,
                is_write_access: write,
                is_present: false,
                is_user: true,
                stack_pointer,
            };
            let pte = match self.translate_locked(&s, pid, cur) {
                Some(pte) if !write || pte.is_writable() => pte,
                Some(_) => {
                    let reason = PageFaultReason {
                        is_present: true,
                        ..reason
                    };
                    match self.resolve_locked(&mut s, pid, &reason) {
                        Err(terminated) => return Err(terminated),
                        Ok(r) => panic!("vm: write to read-only page at {cur:#x} resolved by {r:?}"),
                    }
                }
                None => {
                    self.resolve_locked(&mut s, pid, &reason)?;
                    match self.translate_locked(&s, pid, cur) {
                        Some(pte) => pte,
                        None => panic!("vm: fault at {cur:#x} resolved without a mapping"),
                    }
                }
            };
            if let (Some(proc), Some(va)) = (s.procs.get_mut(pid), Va::new(cur)) {
                proc.page_dir.mark_accessed(va, write);
            }
            self.allocator.read_page(pte.pa, &mut page);
            if f(ofs, done..done + chunk, &mut page) {
                self.allocator.write_page(pte.pa, &page);
            }
            done += chunk;
        }
        s.unlock();
        Ok(())
    }

    fn translate_locked(&self, s: &VmState, pid: Pid, addr: usize) -> Option<Pte> {
        let va = Va::new(addr)?;
        s.procs.get(pid)?.page_dir.walk(va)
    }

    /// Returns the physical address `va` translates to in `pid`.
    pub fn translate(&self, pid: Pid, va: Va) -> Option<Pa> {
        let s = self.state.lock();
        let pa = self
            .translate_locked(&s, pid, va.into_usize())
            .map(|pte| pte.pa + va.offset());
        s.unlock();
        pa
    }

    /// Snapshot of the SPT record of the page containing `va`.
    pub fn lookup_page(&self, pid: Pid, va: Va) -> Option<PageInfo> {
        let key = PageKey::new(pid, va);
        let s = self.state.lock();
        let info = s.spt.lookup(key).map(|e| PageInfo {
            frame: e.frame,
            swap_slot: s.swap.lookup_by_owner(key),
            mapping: e.mapping,
            writable: e.perm.contains(Permission::WRITE),
        });
        s.unlock();
        info
    }

    /// The page occupying `frame`.
    pub fn frame_owner(&self, frame: Pa) -> Option<PageKey> {
        let s = self.state.lock();
        let owner = s.frames.lookup_by_frame(frame);
        s.unlock();
        owner
    }

    /// The frame holding the page containing `va`.
    pub fn frame_of(&self, pid: Pid, va: Va) -> Option<Pa> {
        let s = self.state.lock();
        let frame = s.frames.lookup_by_owner(PageKey::new(pid, va));
        s.unlock();
        frame
    }

    /// The swap slot holding the page containing `va`.
    pub fn swap_slot_of(&self, pid: Pid, va: Va) -> Option<SwapSlot> {
        let s = self.state.lock();
        let slot = s.swap.lookup_by_owner(PageKey::new(pid, va));
        s.unlock();
        slot
    }

    /// The state of a swap slot, or `None` if it is beyond the device.
    pub fn slot_state(&self, slot: SwapSlot) -> Option<SlotState> {
        let s = self.state.lock();
        let state = s.swap.slot_state(slot);
        s.unlock();
        state
    }

    /// Number of unowned swap slots.
    pub fn free_swap_slots(&self) -> usize {
        let s = self.state.lock();
        let n = s.swap.free_slots();
        s.unlock();
        n
    }

    /// Number of resident pages.
    pub fn resident_pages(&self) -> usize {
        let s = self.state.lock();
        let n = s.frames.len();
        s.unlock();
        n
    }

    /// Resident pages in eviction order, next victim first.
    pub fn eviction_order(&self) -> Vec<PageKey> {
        let s = self.state.lock();
        let order = s.policy.order();
        s.unlock();
        order
    }

    /// The exit status of `pid`, once it has exited.
    pub fn exit_status(&self, pid: Pid) -> Option<i32> {
        let s = self.state.lock();
        let status = s.procs.exit_status(pid);
        s.unlock();
        status
    }

    /// The lowest stack address of `pid`.
    pub fn stack_end(&self, pid: Pid) -> Option<Va> {
        let s = self.state.lock();
        let end = s.procs.get(pid).map(|p| p.stack_end);
        s.unlock();
        end
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        StatsSnapshot {
            page_faults: load(&*self.stats.page_faults),
            lazy_loads: load(&self.stats.lazy_loads),
            swap_ins: load(&self.stats.swap_ins),
            stack_growths: load(&self.stats.stack_growths),
            evictions: load(&self.stats.evictions),
            killed: load(&self.stats.killed),
        }
    }

    /// Checks that the tables agree with each other.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let s = self.state.lock();
        let r = Self::verify_locked(&s, self.allocator.as_ref());
        s.unlock();
        r
    }

    fn verify_locked(s: &VmState, allocator: &dyn PageAllocator) -> Result<(), InvariantViolation> {
        let tracked = s.policy.order();
        let mut resident = 0;
        for (key, entry) in s.spt.iter() {
            let key = *key;
            let pte = s.procs.get(key.pid).and_then(|p| p.page_dir.walk(key.va));
            match entry.frame {
                Some(frame) => {
                    resident += 1;
                    if s.frames.lookup_by_owner(key) != Some(frame) {
                        return Err(InvariantViolation::MissingFrameRecord(key, frame));
                    }
                    if s.swap.lookup_by_owner(key).is_some() {
                        return Err(InvariantViolation::ResidentAndSwapped(key));
                    }
                    if pte.map(|pte| pte.pa) != Some(frame) {
                        return Err(InvariantViolation::MappingMismatch(key));
                    }
                    if !tracked.contains(&key) {
                        return Err(InvariantViolation::PolicyMismatch(key));
                    }
                }
                None => {
                    if pte.is_some() {
                        return Err(InvariantViolation::MappingMismatch(key));
                    }
                }
            }
        }
        for (frame, owner) in s.frames.iter() {
            if s.spt.lookup(owner).and_then(|e| e.frame) != Some(frame) {
                return Err(InvariantViolation::OrphanFrameRecord(frame, owner));
            }
        }
        for (owner, slot) in s.swap.owned() {
            match s.spt.lookup(owner) {
                Some(entry) if !entry.is_resident() => (),
                _ => return Err(InvariantViolation::OrphanSwapSlot(slot, owner)),
            }
        }
        if let Some(key) = tracked.iter().find(|k| s.frames.lookup_by_owner(**k).is_none()) {
            return Err(InvariantViolation::PolicyMismatch(*key));
        }
        for proc in s.procs.iter() {
            for (va, _) in proc.page_dir.iter() {
                let key = PageKey::new(proc.pid, va);
                if s.frames.lookup_by_owner(key).is_none() {
                    return Err(InvariantViolation::MappingMismatch(key));
                }
            }
        }
        let allocated = allocator.capacity() - allocator.free_pages();
        if allocated != resident || resident != s.frames.len() {
            return Err(InvariantViolation::FrameLeak {
                allocated,
                resident: s.frames.len(),
            });
        }
        Ok(())
    }
}
