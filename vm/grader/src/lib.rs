//! Grader for the virtual-memory subsystem.
//!
//! Test cases are plain functions grouped by component. `main.rs` runs them
//! through [`TestDriver`]; `tests/grade.rs` exposes the same functions to
//! `cargo test`.

pub mod concurrency;
pub mod eviction;
pub mod fault;
pub mod frame_table;
pub mod scenario;
pub mod spt;
pub mod swap;

use log::LevelFilter;
use machine::{
    addressing::{PAGE_SIZE, Va},
    dev::RamDisk,
    kprint::KernelLogger,
    mm::Ram,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use vm::{
    Pid, VmConfig, VmContext, VmError,
    loader::BackingFile,
    swap::SECTORS_PER_SLOT,
};

/// One past the top of every test process's stack.
pub const STACK_TOP: usize = 0x4748_0000;
/// Where test processes keep their code.
pub const CODE_BASE: usize = 0x40_0000;
/// Where test processes keep anonymous data.
pub const DATA_BASE: usize = 0x1000_0000;

struct Stdout;

impl core::fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        print!("{s}");
        Ok(())
    }
}

static LOGGER: KernelLogger<Stdout> = KernelLogger::new(Stdout, LevelFilter::Trace);

/// Installs the kernel logger. The level is taken from `VM_LOG`
/// (`error`, `warn`, `info`, `debug`, `trace`) and defaults to `error`.
pub fn init_logger() {
    let level = std::env::var("VM_LOG")
        .ok()
        .and_then(|l| l.parse().ok())
        .unwrap_or(LevelFilter::Error);
    machine::kprint::init(&LOGGER, level);
}

/// Shorthand for a virtual address that is known to be canonical.
pub fn va(addr: usize) -> Va {
    Va::new(addr).unwrap()
}

/// A context together with the devices behind it.
pub struct Bench {
    pub vm: VmContext,
    pub ram: Arc<Ram>,
    pub disk: Arc<RamDisk>,
}

impl Bench {
    /// A bench with the default configuration.
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        Self::with(VmConfig::default(), frames, RamDisk::new(swap_slots * SECTORS_PER_SLOT))
    }

    /// A bench with an explicit configuration and swap disk.
    pub fn with(config: VmConfig, frames: usize, disk: RamDisk) -> Self {
        init_logger();
        let ram = Arc::new(Ram::new(frames));
        let disk = Arc::new(disk);
        let vm = VmContext::new(config, ram.clone(), disk.clone());
        Self { vm, ram, disk }
    }

    /// Creates process `pid` with its stack at [`STACK_TOP`].
    pub fn spawn(&self, pid: u32) -> Pid {
        let pid = Pid(pid);
        self.vm.create_process(pid, va(STACK_TOP)).unwrap();
        pid
    }

    /// Declares `pages` writable anonymous pages at [`DATA_BASE`].
    pub fn anon(&self, pid: Pid, pages: usize) {
        self.vm
            .register_mapping(pid, va(DATA_BASE), None, 0, pages * PAGE_SIZE, true, None)
            .unwrap();
    }

    /// Fills page `n` of the data region with `byte`.
    pub fn fill(&self, pid: Pid, n: usize, byte: u8) {
        self.vm
            .write_user(pid, DATA_BASE + n * PAGE_SIZE, &[byte; PAGE_SIZE], STACK_TOP)
            .unwrap();
    }

    /// Reads page `n` of the data region.
    pub fn page(&self, pid: Pid, n: usize) -> Vec<u8> {
        let mut buf = vec![0; PAGE_SIZE];
        self.vm
            .read_user(pid, DATA_BASE + n * PAGE_SIZE, &mut buf, STACK_TOP)
            .unwrap();
        buf
    }

    /// Asserts that every table invariant holds.
    #[track_caller]
    pub fn check(&self) {
        if let Err(e) = self.vm.verify() {
            panic!("table invariant violated: {e:?}");
        }
    }
}

/// An in-memory file.
pub struct MemFile {
    data: Mutex<Vec<u8>>,
    writes: AtomicUsize,
    read_only: bool,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            writes: AtomicUsize::new(0),
            read_only: false,
        })
    }

    /// A file that fails every write.
    pub fn read_only(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            writes: AtomicUsize::new(0),
            read_only: true,
        })
    }

    /// This file as the source of a mapping.
    pub fn source(self: &Arc<Self>) -> Option<Arc<dyn BackingFile>> {
        let file: Arc<dyn BackingFile> = self.clone();
        Some(file)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Number of `write_at` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BackingFile for MemFile {
    fn read_at(&self, pos: usize, buf: &mut [u8]) -> Result<usize, VmError> {
        let data = self.data.lock().unwrap();
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }

    fn write_at(&self, pos: usize, buf: &[u8]) -> Result<usize, VmError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.read_only {
            return Err(VmError::InvalidAccess);
        }
        let mut data = self.data.lock().unwrap();
        if data.len() < pos + buf.len() {
            data.resize(pos + buf.len(), 0);
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}

/// Deterministic, non-repeating bytes.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

/// A test case runnable by [`TestDriver`].
pub trait TestCase: Sync + Send {
    fn name(&'static self) -> &'static str;
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }

    fn run(&'static self) -> bool {
        print!("test {} ... ", self.name());
        let passed = match std::thread::Builder::new()
            .name(self.name().into())
            .spawn(self)
        {
            Ok(handle) => handle.join().is_ok(),
            Err(_) => false,
        };
        if passed {
            println!("ok");
            true
        } else {
            println!("FAILED");
            false
        }
    }
}

/// A driver for running tests.
pub struct TestDriver;

impl TestDriver {
    /// Runs the given tests, or those named on the command line. Returns
    /// true if all passed.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC]) -> bool {
        let filter: Vec<String> = std::env::args().skip(1).collect();
        let tests = tests
            .iter()
            .filter(|test| {
                let name = test.name();
                let short = name.split("::").skip(1).collect::<Vec<_>>().join("::");
                filter.is_empty() || filter.iter().any(|f| *f == short)
            })
            .collect::<Vec<_>>();
        let (total, mut succ) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );
        for test in tests {
            if test.run() {
                succ += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if total == succ { "ok" } else { "FAILED" },
            succ,
            total - succ
        );
        total == succ
    }
}
