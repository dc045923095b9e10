//! # Page faults
//!
//! The trap layer reads `cr2` and the error code pushed by the CPU, and
//! hands them, together with the user stack pointer, to
//! [`VmContext::page_fault`](crate::VmContext::page_fault). The resolver
//! classifies the fault in this order:
//!
//! 1. The address is null or in the kernel half: fatal.
//! 2. The page is not mapped in the page directory:
//!    1. The address is exactly one page below the stack pointer: fatal
//!       (when [`VmConfig::reject_guard_page`] is set).
//!    2. The page has an SPT record: bring it in, from swap if it was
//!       evicted or from its loader otherwise ([`Resolution::SwapIn`],
//!       [`Resolution::LazyLoad`]).
//!    3. The address is at most [`VmConfig::stack_growth_margin`] bytes
//!       below the stack pointer, inside the stack limit: map a fresh
//!       zero page ([`Resolution::StackGrowth`]).
//!    4. Otherwise: fatal.
//! 3. The page is mapped but faulted anyway (e.g. a write to a read-only
//!    page): fatal.
//!
//! A fatal fault terminates the process with exit status `-1`. There is no
//! pending state: every fault either installs a mapping or kills the
//! process.
//!
//! [`VmConfig::reject_guard_page`]: crate::VmConfig::reject_guard_page
//! [`VmConfig::stack_growth_margin`]: crate::VmConfig::stack_growth_margin

use crate::{Pid, Va, VmError};
use machine::interrupt::PFErrorCode;

/// Decoded page-fault information.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultReason {
    /// The address that caused the page fault (`cr2`).
    pub fault_addr: usize,
    /// Whether the access was a write.
    pub is_write_access: bool,
    /// Whether the page was present, i.e. the fault is a protection
    /// violation.
    pub is_present: bool,
    /// Whether the access came from user mode.
    pub is_user: bool,
    /// The user stack pointer at the time of the fault.
    pub stack_pointer: usize,
}

impl PageFaultReason {
    /// Probe the cause of page fault into a [`PageFaultReason`].
    pub fn new(ec: PFErrorCode, cr2: usize, stack_pointer: usize) -> Self {
        PageFaultReason {
            fault_addr: cr2,
            is_write_access: ec.contains(PFErrorCode::WRITE_ACCESS),
            is_present: ec.contains(PFErrorCode::PRESENT),
            is_user: ec.contains(PFErrorCode::USER),
            stack_pointer,
        }
    }
}

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A declared page was loaded for the first time.
    LazyLoad,
    /// An evicted page was read back from swap.
    SwapIn,
    /// The stack grew by one page.
    StackGrowth,
}

/// Why a fault was fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// The address is null, non-canonical, or in the kernel half.
    KernelAddress,
    /// The address is exactly one page below the stack pointer.
    StackGuard,
    /// Nothing backs the address and it is not a stack access.
    Unbacked,
    /// The page is mapped but the access is not allowed.
    Protection,
    /// Resolving the fault needed a resource that is not available.
    Resource(VmError),
    /// The process had already exited when the fault was resolved, e.g. a
    /// second thread that faulted while the first was being killed.
    Exited,
}

impl From<VmError> for FaultError {
    fn from(e: VmError) -> Self {
        FaultError::Resource(e)
    }
}

/// A process was killed by a fault it could not survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminated {
    /// The killed process.
    pub pid: Pid,
    /// The exit status recorded for it.
    pub status: i32,
    /// The faulting address.
    pub fault_addr: usize,
    /// Why the fault was fatal.
    pub cause: FaultError,
}

/// Exit status of a process killed by a fault.
pub const FAULT_EXIT_STATUS: i32 = -1;

/// Returns the faulting address as a user page address, or the reason it
/// is not one.
pub(crate) fn user_page(addr: usize) -> Result<Va, FaultError> {
    match Va::new(addr) {
        Some(va) if va.is_user() && !va.page_down().is_null() => Ok(va.page_down()),
        _ => Err(FaultError::KernelAddress),
    }
}
