//! Kernel print utilities.
//!
//! Messages are routed through the [`log`] facade. [`KernelLogger`] is the
//! backend: it prefixes each record with its level (`[INFO]`, `[WARN]`, ...)
//! and writes it to a serial-like sink held behind a [`SpinLock`].

use crate::spinlock::SpinLock;
use core::{
    fmt::Write,
    sync::atomic::{AtomicBool, Ordering},
};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Suppresses every message when set.
pub static QUIET: AtomicBool = AtomicBool::new(false);

/// A [`log::Log`] backend writing to a [`core::fmt::Write`] sink.
pub struct KernelLogger<W: Write + Send> {
    sink: SpinLock<W>,
    level: LevelFilter,
}

impl<W: Write + Send> KernelLogger<W> {
    /// Creates a logger that emits records up to `level` into `sink`.
    pub const fn new(sink: W, level: LevelFilter) -> Self {
        Self {
            sink: SpinLock::new(sink),
            level,
        }
    }

    fn tag(level: Level) -> &'static str {
        match level {
            Level::Error => "[ERROR]",
            Level::Warn => "[WARN]",
            Level::Info => "[INFO]",
            Level::Debug => "[DEBUG]",
            Level::Trace => "[TRACE]",
        }
    }
}

impl<W: Write + Send> Log for KernelLogger<W> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && !QUIET.load(Ordering::SeqCst)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut guard = self.sink.lock();
        let _ = writeln!(
            &mut *guard,
            "{} {}: {}",
            Self::tag(record.level()),
            record.target(),
            record.args()
        );
        guard.unlock();
    }

    fn flush(&self) {}
}

/// Installs `logger` as the global logger.
///
/// Only the first call installs a logger; later calls keep the existing one
/// and only adjust the maximum level.
pub fn init(logger: &'static dyn Log, level: LevelFilter) {
    let _ = log::set_logger(logger);
    log::set_max_level(level);
}
