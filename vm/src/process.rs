//! Process directory.
//!
//! The virtual-memory core only needs a sliver of a process: its page
//! directory, its stack bounds, and a place to record the exit status when
//! a fault kills it.

use crate::{Pid, Va, VmError, page_dir::PageDirectory};
use alloc::collections::BTreeMap;
use machine::addressing::USER_TOP;

/// The virtual-memory view of a process.
pub struct Process {
    /// The process id.
    pub pid: Pid,
    /// The hardware-visible translation of this process.
    pub page_dir: PageDirectory,
    /// One past the highest stack address.
    pub stack_top: Va,
    /// The lowest address of the stack grown so far.
    pub stack_end: Va,
    /// Exit status, once the process has exited.
    pub exit_status: Option<i32>,
}

impl Process {
    fn new(pid: Pid, stack_top: Va) -> Self {
        Self {
            pid,
            page_dir: PageDirectory::new(),
            stack_top,
            stack_end: stack_top,
            exit_status: None,
        }
    }

    /// Returns true until the process has exited.
    pub fn is_alive(&self) -> bool {
        self.exit_status.is_none()
    }
}

/// Maps process ids to process records.
#[derive(Default)]
pub struct ProcessDirectory {
    procs: BTreeMap<Pid, Process>,
}

impl ProcessDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new process whose stack ends just below `stack_top`.
    ///
    /// A pid may be reused once its previous owner has exited.
    pub fn create(&mut self, pid: Pid, stack_top: Va) -> Result<&mut Process, VmError> {
        let top = stack_top.into_usize();
        if !stack_top.is_aligned() || top == 0 || top > USER_TOP {
            return Err(VmError::InvalidArgument);
        }
        if self.procs.get(&pid).is_some_and(Process::is_alive) {
            return Err(VmError::AlreadyExists);
        }
        self.procs.insert(pid, Process::new(pid, stack_top));
        self.procs.get_mut(&pid).ok_or(VmError::NoSuchEntry)
    }

    /// Looks up a process.
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(&pid)
    }

    /// Looks up a process for modification.
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    /// Looks up a process that has not exited.
    pub fn alive_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&pid).filter(|p| p.is_alive())
    }

    /// The exit status of `pid`, if it has exited.
    pub fn exit_status(&self, pid: Pid) -> Option<i32> {
        self.procs.get(&pid).and_then(|p| p.exit_status)
    }

    /// Returns true if `pid` exists and has not exited.
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.procs.get(&pid).is_some_and(Process::is_alive)
    }

    /// Iterates over all processes.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.values()
    }
}
