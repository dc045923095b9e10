//! # Demand-paged virtual memory.
//!
//! This crate resolves page faults for user processes. When a process
//! touches a page that is not mapped, the trap layer hands the faulting
//! address to [`VmContext::handle_page_fault`], which locates the page's
//! backing data (executable image, zero-fill, memory-mapped file, or swap),
//! obtains a physical frame for it, and installs the mapping. If the access
//! cannot be satisfied, the process is terminated with exit status `-1`.
//!
//! ## Tables
//!
//! Four tables cooperate to keep track of where every page lives:
//!
//! - [`frame_table::FrameTable`]: physical frame → owning page.
//! - [`spt::SupplementalPageTable`]: page → backing-store state (resident
//!   frame, lazy-load source, mapping id).
//! - [`swap::SwapManager`]: swap slot → owning page, or free.
//! - [`eviction::EvictionPolicy`]: the order in which resident pages are
//!   sacrificed when physical memory runs out.
//!
//! Every page of every process is identified by a [`PageKey`], the pair of a
//! page-aligned virtual address and a [`Pid`]. At any time a page is in
//! exactly one of three states:
//!
//! | State      | Frame record | Swap slot | SPT frame pointer |
//! |------------|--------------|-----------|-------------------|
//! | resident   | yes          | no        | non-null          |
//! | swapped    | no           | yes       | null              |
//! | unbacked   | no           | no        | no SPT record     |
//!
//! Pages that were declared (by [`VmContext::register_mapping`]) but never
//! touched have an SPT record with a null frame and no swap slot.
//!
//! ## Locking
//!
//! All tables live in a single [`context::VmState`] protected by one
//! [`SpinLock`](machine::spinlock::SpinLock). Each public operation of
//! [`VmContext`] takes the lock once and runs to completion, including the
//! disk I/O of an eviction, so that no other thread can observe a frame as
//! both free and in use. The physical allocator and the swap device are leaf
//! calls made while the lock is held.
//!
//! ## Errors
//!
//! Recoverable conditions are reported as [`VmError`]. A fault that cannot
//! be resolved terminates the faulting process and is reported to the trap
//! layer as [`fault::Terminated`]. A table lookup that the algorithm
//! guarantees to succeed but fails is a kernel bug and panics.
#![no_std]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod eviction;
pub mod fault;
pub mod frame_table;
pub mod loader;
pub mod page_dir;
pub mod process;
pub mod spt;
pub mod swap;

pub use config::{PolicyKind, VmConfig, VmConfigBuilder};
pub use context::{StatsSnapshot, VmContext};
pub use machine::addressing::{PAGE_SIZE, Pa, Va};

/// A process identifier.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Identifier of a memory-mapped region, as handed out by the mmap layer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MappingId(pub u32);

/// The identity of a virtual page: a page-aligned address in a process.
///
/// Keys order by process first, so all pages of one process form a
/// contiguous range in ordered maps.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageKey {
    /// The owning process.
    pub pid: Pid,
    /// The page-aligned virtual address.
    pub va: Va,
}

impl PageKey {
    /// Builds the key of the page containing `va` in `pid`.
    pub fn new(pid: Pid, va: Va) -> Self {
        Self {
            pid,
            va: va.page_down(),
        }
    }

    /// The smallest key of `pid`.
    pub(crate) fn first_of(pid: Pid) -> Self {
        Self {
            pid,
            va: Va::NULL,
        }
    }
}

impl core::fmt::Display for PageKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:?}, {})", self.va, self.pid)
    }
}

/// Errors reported by the virtual-memory subsystem.
///
/// Each variant corresponds to the errno that a system call backed by the
/// failing operation would return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VmError {
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// No space left on device. (ENOSPC)
    ///
    /// Returned when an eviction needs a swap slot and every slot is owned.
    NoSpace,
    /// IO Error. (EIO)
    IOError,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// No such entry. (ENOENT)
    NoSuchEntry,
    /// Entry exists. (EEXIST)
    AlreadyExists,
}

impl VmError {
    /// Converts the [`VmError`] into the negative errno returned to user
    /// programs.
    pub fn into_isize(self) -> isize {
        match self {
            VmError::NoSuchEntry => -2,
            VmError::IOError => -5,
            VmError::NoMemory => -12,
            VmError::InvalidAccess => -13,
            VmError::BadAddress => -14,
            VmError::AlreadyExists => -17,
            VmError::InvalidArgument => -22,
            VmError::NoSpace => -28,
        }
    }
}

impl From<machine::dev::DeviceError> for VmError {
    fn from(_: machine::dev::DeviceError) -> Self {
        VmError::IOError
    }
}
