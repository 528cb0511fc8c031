//! The block device boundary.
//!
//! The filesystem never assumes a concrete storage backend; it talks to
//! whatever implements [`BlockDevice`]. [`MemDisk`] is the in-memory
//! implementation this crate ships for tests and stands in for a real
//! driver, the same way a teaching kernel injects a `Disk` collaborator
//! rather than hard-coding one.

use std::sync::Mutex;

/// Bytes per sector. Fixed at format time, assumed 512 throughout.
pub const SECTOR_SIZE: usize = 512;

/// A sector index on a block device.
pub type SectorNo = u32;

/// One sector's worth of bytes.
pub type SectorBuf = [u8; SECTOR_SIZE];

/// A uniform sector-addressed block device.
///
/// Implementations must make every sector in `0..sector_count()` readable
/// and writable; reads of a never-written sector return zeros.
pub trait BlockDevice: Send + Sync {
    /// Total number of addressable sectors.
    fn sector_count(&self) -> SectorNo;

    /// Reads sector `sector` into `buf`.
    fn read(&self, sector: SectorNo, buf: &mut SectorBuf);

    /// Writes `buf` to sector `sector`.
    fn write(&self, sector: SectorNo, buf: &SectorBuf);
}

/// An in-memory block device, the crate's stand-in for a real driver.
pub struct MemDisk {
    sectors: Mutex<Vec<SectorBuf>>,
}

impl MemDisk {
    /// Creates a zero-filled device with `sector_count` sectors.
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count as usize]),
        }
    }
}

impl BlockDevice for MemDisk {
    fn sector_count(&self) -> SectorNo {
        self.sectors.lock().unwrap().len() as u32
    }

    fn read(&self, sector: SectorNo, buf: &mut SectorBuf) {
        let sectors = self.sectors.lock().unwrap();
        buf.copy_from_slice(&sectors[sector as usize]);
    }

    fn write(&self, sector: SectorNo, buf: &SectorBuf) {
        let mut sectors = self.sectors.lock().unwrap();
        sectors[sector as usize].copy_from_slice(buf);
    }
}
