//! The on-disk inode record, the in-memory open-inode cache, and the
//! multi-level block-pointer translation that turns a byte offset into a
//! sector index.

use std::sync::{Arc, Mutex};

use crate::disk::{SectorBuf, SectorNo, SECTOR_SIZE};
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;

/// Magic value stamped into every on-disk inode; corruption is detected by
/// a mismatch on read.
pub const INODE_MAGIC: u32 = 0x494E_4F44;

/// Direct sector pointers held in the inode record itself.
pub const DIRECT_COUNT: usize = 10;

/// Sector pointers packed into one indirect block (`512 / size_of::<u32>()`).
pub const PTRS_PER_BLOCK: usize = SECTOR_SIZE / 4;

/// Largest file size this filesystem can represent, in bytes.
pub const MAX_FILE_SIZE: u32 = 8 * 1024 * 1024;

const DIRECT_CAPACITY: u32 = (DIRECT_COUNT * SECTOR_SIZE) as u32;
const SINGLE_CAPACITY: u32 = (PTRS_PER_BLOCK * SECTOR_SIZE) as u32;
const DOUBLE_CAPACITY: u32 = (PTRS_PER_BLOCK * PTRS_PER_BLOCK * SECTOR_SIZE) as u32;

/// The on-disk inode record. Exactly one sector once serialized.
#[derive(Debug, Clone)]
pub struct InodeDisk {
    pub length: u32,
    pub is_dir: bool,
    pub parent: SectorNo,
    pub direct: [SectorNo; DIRECT_COUNT],
    pub single_indirect: SectorNo,
    pub double_indirect: SectorNo,
}

impl InodeDisk {
    /// Builds a fresh, unpopulated record for a new inode at `sector`
    /// (`parent` defaults to `sector` itself, matching the root's
    /// self-referential parent; callers override for non-root inodes).
    fn new_on(sector: SectorNo, is_dir: bool) -> Self {
        Self {
            length: 0,
            is_dir,
            parent: sector,
            direct: [0; DIRECT_COUNT],
            single_indirect: 0,
            double_indirect: 0,
        }
    }

    fn to_bytes(&self) -> SectorBuf {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&INODE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.is_dir as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.parent.to_le_bytes());
        let mut off = 16;
        for d in &self.direct {
            buf[off..off + 4].copy_from_slice(&d.to_le_bytes());
            off += 4;
        }
        buf[off..off + 4].copy_from_slice(&self.single_indirect.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.double_indirect.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &SectorBuf) -> FsResult<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != INODE_MAGIC {
            return Err(FsError::FilesystemCorrupted("inode magic mismatch"));
        }
        let length = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let is_dir = u32::from_le_bytes(buf[8..12].try_into().unwrap()) != 0;
        let parent = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let mut direct = [0u32; DIRECT_COUNT];
        let mut off = 16;
        for d in &mut direct {
            *d = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            off += 4;
        }
        let single_indirect = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let double_indirect = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        Ok(Self {
            length,
            is_dir,
            parent,
            direct,
            single_indirect,
            double_indirect,
        })
    }
}

fn read_ptr_block(fs: &FileSystem, sector: SectorNo) -> [SectorNo; PTRS_PER_BLOCK] {
    let mut buf = [0u8; SECTOR_SIZE];
    fs.disk.read(sector, &mut buf);
    let mut ptrs = [0u32; PTRS_PER_BLOCK];
    for (i, p) in ptrs.iter_mut().enumerate() {
        *p = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
    }
    ptrs
}

fn write_ptr_block(fs: &FileSystem, sector: SectorNo, ptrs: &[SectorNo; PTRS_PER_BLOCK]) {
    let mut buf = [0u8; SECTOR_SIZE];
    for (i, p) in ptrs.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
    }
    fs.disk.write(sector, &buf);
}

/// The in-memory open-inode object: one per on-disk sector with at least
/// one live handle, shared by every handle opened against that sector.
#[derive(Debug)]
pub struct InodeEntry {
    pub sector: SectorNo,
    open_count: u32,
    deny_write_count: u32,
    removed: bool,
    disk: InodeDisk,
}

/// A counted, shared reference to an open in-memory inode.
pub type InodeRef = Arc<Mutex<InodeEntry>>;

impl InodeEntry {
    pub fn sector(&self) -> SectorNo {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.disk.is_dir
    }

    pub fn length(&self) -> u32 {
        self.disk.length
    }

    pub fn parent(&self) -> SectorNo {
        self.disk.parent
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }
}

/// Formats a brand-new inode at `sector`: writes a zeroed record, then
/// grows it to `length` bytes, allocating and zeroing data blocks as it
/// goes. On allocation failure every block obtained during this call is
/// released and the sector is left unwritten-to beyond its header.
pub fn create(fs: &FileSystem, sector: SectorNo, length: u32, is_dir: bool) -> FsResult<()> {
    let length = length.min(MAX_FILE_SIZE);
    let mut disk = InodeDisk::new_on(sector, is_dir);
    grow(fs, &mut disk, length)?;
    fs.disk.write(sector, &disk.to_bytes());
    Ok(())
}

/// Opens (or bumps the open-count of) the inode at `sector`.
pub fn open(fs: &FileSystem, sector: SectorNo) -> FsResult<InodeRef> {
    let mut entries = fs.cache.lock().unwrap();
    if let Some(existing) = entries.get(&sector) {
        existing.lock().unwrap().open_count += 1;
        return Ok(Arc::clone(existing));
    }
    let mut buf = [0u8; SECTOR_SIZE];
    fs.disk.read(sector, &mut buf);
    let disk = InodeDisk::from_bytes(&buf)?;
    let entry = Arc::new(Mutex::new(InodeEntry {
        sector,
        open_count: 1,
        deny_write_count: 0,
        removed: false,
        disk,
    }));
    entries.insert(sector, Arc::clone(&entry));
    Ok(entry)
}

/// Increments the open-count of an already-open inode.
pub fn reopen(fs: &FileSystem, entry: &InodeRef) -> InodeRef {
    entry.lock().unwrap().open_count += 1;
    let _ = fs;
    Arc::clone(entry)
}

/// Decrements the open-count; on reaching zero, evicts from the cache and,
/// if the inode was removed, releases its data sectors and its own sector.
pub fn close(fs: &FileSystem, entry: InodeRef) {
    let sector = entry.lock().unwrap().sector;
    let last_closer = {
        let mut e = entry.lock().unwrap();
        e.open_count -= 1;
        e.open_count == 0
    };
    if !last_closer {
        return;
    }
    fs.cache.lock().unwrap().remove(&sector);
    let (removed, disk) = {
        let e = entry.lock().unwrap();
        (e.removed, e.disk.clone())
    };
    if removed {
        deallocate(fs, &disk);
        fs.free_map.lock().unwrap().release(sector, 1);
        log::debug!("inode: released sector {sector} after last close of removed inode");
    }
}

/// Marks an inode removed; disk changes are deferred to its last close.
pub fn remove(entry: &InodeRef) {
    entry.lock().unwrap().removed = true;
}

pub fn length(entry: &InodeRef) -> u32 {
    entry.lock().unwrap().disk.length
}

/// Number of live handles sharing this in-memory inode, our own included.
/// A directory's cwd reference is one such handle: a count above 1 when the
/// only other opener is the caller's own just-acquired handle means some
/// task still has it as a current directory.
pub fn open_count(entry: &InodeRef) -> u32 {
    entry.lock().unwrap().open_count
}

pub fn deny_write(entry: &InodeRef) {
    let mut e = entry.lock().unwrap();
    e.deny_write_count += 1;
    assert!(e.deny_write_count <= e.open_count);
}

pub fn allow_write(entry: &InodeRef) {
    let mut e = entry.lock().unwrap();
    assert!(e.deny_write_count > 0);
    e.deny_write_count -= 1;
}

/// Overwrites the `parent` pointer stamped into an inode, used once by
/// `mkdir`/`create` right after formatting a new directory, since a fresh
/// `InodeDisk` defaults its parent to itself.
pub fn set_parent(fs: &FileSystem, entry: &InodeRef, parent: SectorNo) {
    let (sector, bytes) = {
        let mut e = entry.lock().unwrap();
        e.disk.parent = parent;
        (e.sector, e.disk.to_bytes())
    };
    fs.disk.write(sector, &bytes);
}

/// Translates a byte offset within a valid (`off < length`) range to a
/// sector index, walking direct, single-indirect, or double-indirect
/// pointers as needed.
fn xlate(fs: &FileSystem, disk: &InodeDisk, off: u32) -> SectorNo {
    if off < DIRECT_CAPACITY {
        return disk.direct[(off / SECTOR_SIZE as u32) as usize];
    }
    if off < DIRECT_CAPACITY + SINGLE_CAPACITY {
        let i = (off - DIRECT_CAPACITY) / SECTOR_SIZE as u32;
        let block = read_ptr_block(fs, disk.single_indirect);
        return block[i as usize];
    }
    let r = off - DIRECT_CAPACITY - SINGLE_CAPACITY;
    let i1 = r / (PTRS_PER_BLOCK as u32 * SECTOR_SIZE as u32);
    let i2 = (r / SECTOR_SIZE as u32) % PTRS_PER_BLOCK as u32;
    let outer = read_ptr_block(fs, disk.double_indirect);
    let inner = read_ptr_block(fs, outer[i1 as usize]);
    inner[i2 as usize]
}

/// Reads up to `buf.len()` bytes starting at `offset`, clamped to the
/// inode's current length. Returns the number of bytes actually read.
pub fn read_at(fs: &FileSystem, entry: &InodeRef, buf: &mut [u8], offset: u32) -> usize {
    let disk = entry.lock().unwrap().disk.clone();
    let mut bytes_read = 0usize;
    let mut offset = offset;
    let mut remaining = buf.len();
    while remaining > 0 {
        if offset >= disk.length {
            break;
        }
        let sector_idx = xlate(fs, &disk, offset);
        let sector_ofs = (offset % SECTOR_SIZE as u32) as usize;
        let inode_left = (disk.length - offset) as usize;
        let sector_left = SECTOR_SIZE - sector_ofs;
        let chunk = remaining.min(inode_left).min(sector_left);
        if chunk == 0 {
            break;
        }
        if sector_ofs == 0 && chunk == SECTOR_SIZE {
            let mut sector_buf = [0u8; SECTOR_SIZE];
            fs.disk.read(sector_idx, &mut sector_buf);
            buf[bytes_read..bytes_read + chunk].copy_from_slice(&sector_buf);
        } else {
            let mut scratch = [0u8; SECTOR_SIZE];
            fs.disk.read(sector_idx, &mut scratch);
            buf[bytes_read..bytes_read + chunk]
                .copy_from_slice(&scratch[sector_ofs..sector_ofs + chunk]);
        }
        bytes_read += chunk;
        offset += chunk as u32;
        remaining -= chunk;
    }
    bytes_read
}

/// Writes `buf` at `offset`, growing the inode first if the write would
/// extend past its current length. Returns `0` immediately if writes are
/// currently denied, without touching `offset`/length bookkeeping.
pub fn write_at(fs: &FileSystem, entry: &InodeRef, buf: &[u8], offset: u32) -> FsResult<usize> {
    {
        let e = entry.lock().unwrap();
        if e.deny_write_count > 0 {
            return Ok(0);
        }
    }
    let target_len = offset.saturating_add(buf.len() as u32);
    if target_len > MAX_FILE_SIZE {
        return Err(FsError::Invalid);
    }
    let mut disk = entry.lock().unwrap().disk.clone();
    if target_len > disk.length {
        grow(fs, &mut disk, target_len)?;
        entry.lock().unwrap().disk = disk.clone();
        fs.disk.write(disk_sector(entry), &disk.to_bytes());
    }

    let mut bytes_written = 0usize;
    let mut offset = offset;
    let mut remaining = buf.len();
    while remaining > 0 {
        let sector_idx = xlate(fs, &disk, offset);
        let sector_ofs = (offset % SECTOR_SIZE as u32) as usize;
        let inode_left = (disk.length - offset) as usize;
        let sector_left = SECTOR_SIZE - sector_ofs;
        let chunk = remaining.min(inode_left).min(sector_left);
        if chunk == 0 {
            break;
        }
        if sector_ofs == 0 && chunk == SECTOR_SIZE {
            let mut sector_buf = [0u8; SECTOR_SIZE];
            sector_buf.copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
            fs.disk.write(sector_idx, &sector_buf);
        } else {
            let mut scratch = [0u8; SECTOR_SIZE];
            if sector_ofs > 0 || chunk < sector_left {
                fs.disk.read(sector_idx, &mut scratch);
            }
            scratch[sector_ofs..sector_ofs + chunk]
                .copy_from_slice(&buf[bytes_written..bytes_written + chunk]);
            fs.disk.write(sector_idx, &scratch);
        }
        bytes_written += chunk;
        offset += chunk as u32;
        remaining -= chunk;
    }
    Ok(bytes_written)
}

fn disk_sector(entry: &InodeRef) -> SectorNo {
    entry.lock().unwrap().sector
}

/// Advances the inode's block pointers to cover `new_len` bytes, allocating
/// and zeroing exactly the sectors needed beyond the current length. On
/// partial allocation failure every sector obtained during *this* call is
/// released and `disk` (aside from pointer state already committed for
/// previously-completed regions) is left as it was on entry.
fn grow(fs: &FileSystem, disk: &mut InodeDisk, new_len: u32) -> FsResult<()> {
    let cur_sectors = disk.length.div_ceil(SECTOR_SIZE as u32) as usize;
    let new_sectors = new_len.div_ceil(SECTOR_SIZE as u32) as usize;
    if new_sectors == cur_sectors {
        disk.length = new_len;
        return Ok(());
    }

    let mut obtained: Vec<SectorNo> = Vec::new();
    let zero = [0u8; SECTOR_SIZE];

    let result = (|| -> FsResult<()> {
        let mut idx = cur_sectors;
        while idx < new_sectors {
            if idx < DIRECT_COUNT {
                let s = alloc_sector(fs, &mut obtained)?;
                fs.disk.write(s, &zero);
                disk.direct[idx] = s;
                idx += 1;
                continue;
            }
            if idx < DIRECT_COUNT + PTRS_PER_BLOCK {
                if disk.single_indirect == 0 {
                    disk.single_indirect = alloc_sector(fs, &mut obtained)?;
                    write_ptr_block(fs, disk.single_indirect, &[0; PTRS_PER_BLOCK]);
                }
                let mut block = read_ptr_block(fs, disk.single_indirect);
                let i = idx - DIRECT_COUNT;
                let s = alloc_sector(fs, &mut obtained)?;
                fs.disk.write(s, &zero);
                block[i] = s;
                write_ptr_block(fs, disk.single_indirect, &block);
                idx += 1;
                continue;
            }
            if disk.double_indirect == 0 {
                disk.double_indirect = alloc_sector(fs, &mut obtained)?;
                write_ptr_block(fs, disk.double_indirect, &[0; PTRS_PER_BLOCK]);
            }
            let mut outer = read_ptr_block(fs, disk.double_indirect);
            let r = idx - DIRECT_COUNT - PTRS_PER_BLOCK;
            let i1 = r / PTRS_PER_BLOCK;
            let i2 = r % PTRS_PER_BLOCK;
            if outer[i1] == 0 {
                outer[i1] = alloc_sector(fs, &mut obtained)?;
                write_ptr_block(fs, outer[i1], &[0; PTRS_PER_BLOCK]);
                write_ptr_block(fs, disk.double_indirect, &outer);
            }
            let mut inner = read_ptr_block(fs, outer[i1]);
            let s = alloc_sector(fs, &mut obtained)?;
            fs.disk.write(s, &zero);
            inner[i2] = s;
            write_ptr_block(fs, outer[i1], &inner);
            idx += 1;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            disk.length = new_len;
            Ok(())
        }
        Err(e) => {
            let mut fm = fs.free_map.lock().unwrap();
            for s in obtained {
                fm.release(s, 1);
            }
            log::warn!("inode: grow to {new_len} bytes aborted: {e}");
            Err(e)
        }
    }
}

fn alloc_sector(fs: &FileSystem, obtained: &mut Vec<SectorNo>) -> FsResult<SectorNo> {
    let s = fs
        .free_map
        .lock()
        .unwrap()
        .allocate(1)
        .ok_or(FsError::NoSpace)?;
    obtained.push(s);
    Ok(s)
}

/// Releases every data and indirect block reachable up to `disk.length`.
fn deallocate(fs: &FileSystem, disk: &InodeDisk) {
    let sectors = disk.length.div_ceil(SECTOR_SIZE as u32) as usize;
    let mut fm = fs.free_map.lock().unwrap();
    for idx in 0..sectors.min(DIRECT_COUNT) {
        fm.release(disk.direct[idx], 1);
    }
    if sectors > DIRECT_COUNT {
        let single_used = (sectors - DIRECT_COUNT).min(PTRS_PER_BLOCK);
        let block = read_ptr_block(fs, disk.single_indirect);
        for p in block.iter().take(single_used) {
            fm.release(*p, 1);
        }
        fm.release(disk.single_indirect, 1);
    }
    if sectors > DIRECT_COUNT + PTRS_PER_BLOCK {
        let remaining = sectors - DIRECT_COUNT - PTRS_PER_BLOCK;
        let outer_used = remaining.div_ceil(PTRS_PER_BLOCK);
        let outer = read_ptr_block(fs, disk.double_indirect);
        for (i1, outer_ptr) in outer.iter().enumerate().take(outer_used) {
            let inner_used = if i1 + 1 == outer_used {
                remaining - i1 * PTRS_PER_BLOCK
            } else {
                PTRS_PER_BLOCK
            };
            let inner = read_ptr_block(fs, *outer_ptr);
            for p in inner.iter().take(inner_used) {
                fm.release(*p, 1);
            }
            fm.release(*outer_ptr, 1);
        }
        fm.release(disk.double_indirect, 1);
    }
}
