use super::{BlockOps, DeviceError, SECTOR_SIZE, Sector};
use crate::spinlock::SpinLock;
use alloc::{sync::Arc, vec, vec::Vec};

/// Hook invoked before every transfer with the sector and whether the
/// transfer is a write. Returning an error fails the transfer.
pub type IoHook = Arc<dyn Fn(Sector, bool) -> Result<(), DeviceError> + Send + Sync>;

/// A disk backed by memory.
pub struct RamDisk {
    sectors: SpinLock<Vec<[u8; SECTOR_SIZE]>>,
    hook: Option<IoHook>,
    ro: bool,
}

impl RamDisk {
    /// Creates a zero-filled disk of `sector_cnt` sectors.
    pub fn new(sector_cnt: usize) -> Self {
        Self {
            sectors: SpinLock::new(vec![[0; SECTOR_SIZE]; sector_cnt]),
            hook: None,
            ro: false,
        }
    }

    /// Attaches a hook that observes (and may fail) every transfer.
    pub fn hook(self, hook: IoHook) -> Self {
        Self {
            hook: Some(hook),
            ..self
        }
    }

    /// Make the disk read-only.
    pub fn ro(self) -> Self {
        Self { ro: true, ..self }
    }

    fn run_hook(&self, sector: Sector, is_write: bool) -> Result<(), DeviceError> {
        match &self.hook {
            Some(hook) => hook(sector, is_write),
            None => Ok(()),
        }
    }
}

impl BlockOps for RamDisk {
    fn block_cnt(&self) -> usize {
        self.sectors.lock().len()
    }

    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        self.run_hook(sector, false)?;
        let guard = self.sectors.lock();
        let data = guard
            .get(sector.into_usize())
            .ok_or(DeviceError("sector out of range"))?;
        buf.copy_from_slice(data);
        guard.unlock();
        Ok(())
    }

    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError> {
        if self.ro {
            return Err(DeviceError("write to a read-only disk"));
        }
        self.run_hook(sector, true)?;
        let mut guard = self.sectors.lock();
        let data = guard
            .get_mut(sector.into_usize())
            .ok_or(DeviceError("sector out of range"))?;
        data.copy_from_slice(buf);
        guard.unlock();
        Ok(())
    }
}
