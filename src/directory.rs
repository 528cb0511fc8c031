//! Directory entries, stored as fixed-size records inside a directory
//! inode's own data. `.` and `..` are never stored; they are resolved
//! synthetically by the path resolver from the inode's `parent` pointer.

use crate::disk::SectorNo;
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::inode::{self, InodeRef};

/// Longest allowed directory entry name, not counting a terminator.
pub const NAME_MAX: usize = 14;

/// On-disk size of one directory entry: 1 flag byte + 15 name bytes (14 +
/// NUL) + 4 sector bytes = 20, rounded up to a power of two.
pub const DIRENT_SIZE: usize = 32;

struct DirEntryRaw {
    in_use: bool,
    name: [u8; NAME_MAX + 1],
    sector: SectorNo,
}

impl DirEntryRaw {
    fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0] = self.in_use as u8;
        buf[1..1 + NAME_MAX + 1].copy_from_slice(&self.name);
        buf[16..20].copy_from_slice(&self.sector.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; DIRENT_SIZE]) -> Self {
        let mut name = [0u8; NAME_MAX + 1];
        name.copy_from_slice(&buf[1..1 + NAME_MAX + 1]);
        Self {
            in_use: buf[0] != 0,
            name,
            sector: SectorNo::from_le_bytes(buf[16..20].try_into().unwrap()),
        }
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

fn name_to_bytes(name: &str) -> FsResult<[u8; NAME_MAX + 1]> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(FsError::Invalid);
    }
    let mut out = [0u8; NAME_MAX + 1];
    out[..name.len()].copy_from_slice(name.as_bytes());
    Ok(out)
}

fn entry_count(dir: &InodeRef) -> usize {
    inode::length(dir) as usize / DIRENT_SIZE
}

fn read_entry(fs: &FileSystem, dir: &InodeRef, idx: usize) -> Option<DirEntryRaw> {
    let mut buf = [0u8; DIRENT_SIZE];
    let n = inode::read_at(fs, dir, &mut buf, (idx * DIRENT_SIZE) as u32);
    if n < DIRENT_SIZE {
        return None;
    }
    Some(DirEntryRaw::from_bytes(&buf))
}

fn write_entry(fs: &FileSystem, dir: &InodeRef, idx: usize, entry: &DirEntryRaw) -> FsResult<()> {
    inode::write_at(fs, dir, &entry.to_bytes(), (idx * DIRENT_SIZE) as u32)?;
    Ok(())
}

/// Formats a new, empty directory inode at `sector` with room for
/// `entry_capacity` entries (all slots start `in_use = false`, since a
/// freshly grown inode is zeroed), with `parent` as its `..` target. Pass
/// `sector` itself as `parent` for the root directory.
pub fn create(
    fs: &FileSystem,
    sector: SectorNo,
    entry_capacity: usize,
    parent: SectorNo,
) -> FsResult<()> {
    inode::create(fs, sector, (entry_capacity * DIRENT_SIZE) as u32, true)?;
    if parent != sector {
        let dir = inode::open(fs, sector)?;
        inode::set_parent(fs, &dir, parent);
        inode::close(fs, dir);
    }
    Ok(())
}

/// Finds `name` in `dir`, returning the opened inode reference on a hit.
pub fn lookup(fs: &FileSystem, dir: &InodeRef, name: &str) -> FsResult<InodeRef> {
    for idx in 0..entry_count(dir) {
        if let Some(e) = read_entry(fs, dir, idx) {
            if e.in_use && e.name_str() == name {
                return inode::open(fs, e.sector);
            }
        }
    }
    Err(FsError::NotFound)
}

/// Adds `name -> sector` to `dir`. Fails if `name` is invalid or already
/// present; otherwise reuses a freed slot or appends a new one.
pub fn add(fs: &FileSystem, dir: &InodeRef, name: &str, sector: SectorNo) -> FsResult<()> {
    let name_bytes = name_to_bytes(name)?;
    let count = entry_count(dir);
    let mut free_slot = None;
    for idx in 0..count {
        if let Some(e) = read_entry(fs, dir, idx) {
            if e.in_use && e.name_str() == name {
                return Err(FsError::AlreadyExists);
            }
            if !e.in_use && free_slot.is_none() {
                free_slot = Some(idx);
            }
        }
    }
    let idx = free_slot.unwrap_or(count);
    write_entry(
        fs,
        dir,
        idx,
        &DirEntryRaw {
            in_use: true,
            name: name_bytes,
            sector,
        },
    )
}

/// Removes `name` from `dir` and marks its target inode removed.
/// Refuses to remove a non-empty directory.
pub fn remove(fs: &FileSystem, dir: &InodeRef, name: &str) -> FsResult<()> {
    for idx in 0..entry_count(dir) {
        if let Some(e) = read_entry(fs, dir, idx) {
            if e.in_use && e.name_str() == name {
                let target = inode::open(fs, e.sector)?;
                let target_is_dir = target.lock().unwrap().is_dir();
                if target_is_dir {
                    if !is_empty(fs, &target) {
                        inode::close(fs, target);
                        return Err(FsError::DirectoryNotEmpty);
                    }
                    // Our own `inode::open` above counts as one handle; any
                    // more than that means some task still has it as cwd.
                    if inode::open_count(&target) > 1 {
                        inode::close(fs, target);
                        return Err(FsError::Busy);
                    }
                }
                write_entry(
                    fs,
                    dir,
                    idx,
                    &DirEntryRaw {
                        in_use: false,
                        name: [0; NAME_MAX + 1],
                        sector: 0,
                    },
                )?;
                inode::remove(&target);
                inode::close(fs, target);
                return Ok(());
            }
        }
    }
    Err(FsError::NotFound)
}

/// A directory is empty when it has no live entries (`.`/`..` are not
/// stored, so an empty directory has zero in-use slots).
pub fn is_empty(fs: &FileSystem, dir: &InodeRef) -> bool {
    (0..entry_count(dir)).all(|idx| read_entry(fs, dir, idx).map(|e| !e.in_use).unwrap_or(true))
}

/// Lists the live entries of `dir`, for diagnostics and tests.
pub fn read_dir(fs: &FileSystem, dir: &InodeRef) -> Vec<(String, SectorNo)> {
    (0..entry_count(dir))
        .filter_map(|idx| read_entry(fs, dir, idx))
        .filter(|e| e.in_use)
        .map(|e| (e.name_str().to_string(), e.sector))
        .collect()
}
