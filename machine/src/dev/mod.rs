//! Block devices.
//!
//! The swap area lives on a block device addressed in 512-byte sectors.
//! Drivers implement [`BlockOps`]; [`RamDisk`] is the memory-backed driver
//! used when no real disk is attached.

mod ramdisk;

pub use ramdisk::{IoHook, RamDisk};

/// Size of a single sector, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Error reported by a block device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError(pub &'static str);

/// Sector, an access granuality for the disk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Sector(pub usize);

impl Sector {
    /// Get offset that represented by the sector.
    #[inline]
    pub fn into_offset(self) -> usize {
        self.0 * SECTOR_SIZE
    }

    /// Cast into usize.
    #[inline]
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl core::ops::Add<usize> for Sector {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

/// Sector-granular, synchronous block I/O.
pub trait BlockOps: Send + Sync {
    /// Get total block count of this device.
    fn block_cnt(&self) -> usize;
    /// Read 512 bytes from disk starting from sector.
    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), DeviceError>;
    /// Write 512 bytes to disk starting from sector.
    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), DeviceError>;
}
