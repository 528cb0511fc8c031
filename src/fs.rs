//! The filesystem façade: mount/format, and the path-level operations
//! (`create`, `open`, `remove`, `mkdir`, `chdir`) that syscall dispatch
//! builds on.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::directory;
use crate::disk::{BlockDevice, SectorNo};
use crate::error::{FsError, FsResult};
use crate::free_map::FreeMap;
use crate::inode::{self, InodeRef};
use crate::path;

/// Sector holding the free-map's own inode. Sector 0 is reserved (boot).
const FREE_MAP_SECTOR: SectorNo = 1;

/// Sector holding the root directory's inode.
const ROOT_DIR_SECTOR: SectorNo = 2;

/// The mounted filesystem: the block device, the process-wide open-inode
/// cache, and the in-memory free-map, bundled so every inode/directory/path
/// operation can take `&FileSystem` as its sole piece of shared state.
pub struct FileSystem {
    pub(crate) disk: Arc<dyn BlockDevice>,
    pub(crate) cache: Mutex<BTreeMap<SectorNo, InodeRef>>,
    pub(crate) free_map: Mutex<FreeMap>,
    root_sector: SectorNo,
}

impl FileSystem {
    /// Formats a brand-new filesystem on `disk`: a fresh free-map with
    /// sectors 0 (boot), 1 (free-map inode) and 2 (root directory) marked
    /// used, and an empty root directory.
    pub fn format(disk: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let sector_count = disk.sector_count();
        let bitmap_len = sector_count.div_ceil(8);

        let mut free_map = FreeMap::new(sector_count);
        free_map.mark_used(0);
        free_map.mark_used(FREE_MAP_SECTOR);
        free_map.mark_used(ROOT_DIR_SECTOR);

        let fs = FileSystem {
            disk,
            cache: Mutex::new(BTreeMap::new()),
            free_map: Mutex::new(free_map),
            root_sector: ROOT_DIR_SECTOR,
        };

        inode::create(&fs, FREE_MAP_SECTOR, bitmap_len, false)?;
        directory::create(&fs, ROOT_DIR_SECTOR, 0, ROOT_DIR_SECTOR)?;
        fs.sync_free_map()?;
        log::info!("formatted filesystem: {sector_count} sectors");
        Ok(fs)
    }

    /// Mounts an already-formatted filesystem, reading its persisted
    /// free-map back into memory.
    pub fn mount(disk: Arc<dyn BlockDevice>) -> FsResult<Self> {
        let sector_count = disk.sector_count();
        let bitmap_len = sector_count.div_ceil(8) as usize;

        let fs = FileSystem {
            disk,
            cache: Mutex::new(BTreeMap::new()),
            free_map: Mutex::new(FreeMap::new(sector_count)),
            root_sector: ROOT_DIR_SECTOR,
        };

        let handle = inode::open(&fs, FREE_MAP_SECTOR)?;
        let mut bytes = vec![0u8; bitmap_len];
        inode::read_at(&fs, &handle, &mut bytes, 0);
        inode::close(&fs, handle);
        *fs.free_map.lock().unwrap() = FreeMap::from_bytes(sector_count, &bytes);
        log::info!("mounted filesystem: {sector_count} sectors");
        Ok(fs)
    }

    /// Flushes the in-memory free-map back through its reserved inode.
    /// Call before dropping the filesystem.
    pub fn unmount(&self) -> FsResult<()> {
        self.sync_free_map()
    }

    fn sync_free_map(&self) -> FsResult<()> {
        let bytes = self.free_map.lock().unwrap().to_bytes();
        let handle = inode::open(self, FREE_MAP_SECTOR)?;
        inode::write_at(self, &handle, &bytes, 0)?;
        inode::close(self, handle);
        Ok(())
    }

    /// Opens a fresh reference to the root directory's inode.
    pub fn root_dir(&self) -> FsResult<InodeRef> {
        inode::open(self, self.root_sector)
    }

    fn reject_dot_names(name: &str) -> FsResult<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(FsError::Invalid);
        }
        Ok(())
    }

    /// Creates a new, empty-to-`size` regular file named by `path`.
    pub fn create(&self, cwd: Option<&InodeRef>, path: &str, size: u32) -> FsResult<()> {
        let root = self.root_dir()?;
        let (dir, name) = path::resolve_parent(self, &root, cwd, path)?;
        inode::close(self, root);
        let result = (|| -> FsResult<()> {
            Self::reject_dot_names(name)?;
            let sector = self
                .free_map
                .lock()
                .unwrap()
                .allocate(1)
                .ok_or(FsError::NoSpace)?;
            if let Err(e) = inode::create(self, sector, size, false) {
                self.free_map.lock().unwrap().release(sector, 1);
                return Err(e);
            }
            if let Err(e) = directory::add(self, &dir, name, sector) {
                let h = inode::open(self, sector)?;
                inode::remove(&h);
                inode::close(self, h);
                return Err(e);
            }
            Ok(())
        })();
        inode::close(self, dir);
        result
    }

    /// Creates a new, empty directory named by `path`.
    pub fn mkdir(&self, cwd: Option<&InodeRef>, path: &str) -> FsResult<()> {
        let root = self.root_dir()?;
        let (dir, name) = path::resolve_parent(self, &root, cwd, path)?;
        inode::close(self, root);
        let dir_sector = dir.lock().unwrap().sector();
        let result = (|| -> FsResult<()> {
            Self::reject_dot_names(name)?;
            let sector = self
                .free_map
                .lock()
                .unwrap()
                .allocate(1)
                .ok_or(FsError::NoSpace)?;
            if let Err(e) = directory::create(self, sector, 0, dir_sector) {
                self.free_map.lock().unwrap().release(sector, 1);
                return Err(e);
            }
            if let Err(e) = directory::add(self, &dir, name, sector) {
                let h = inode::open(self, sector)?;
                inode::remove(&h);
                inode::close(self, h);
                return Err(e);
            }
            Ok(())
        })();
        inode::close(self, dir);
        result
    }

    /// Resolves `path` to the inode it names: the corresponding directory's
    /// inode for an empty, `.`, or `..` final component, otherwise the
    /// looked-up entry.
    pub fn open(&self, cwd: Option<&InodeRef>, path: &str) -> FsResult<InodeRef> {
        let root = self.root_dir()?;
        let result = path::resolve(self, &root, cwd, path);
        inode::close(self, root);
        result
    }

    /// Removes the file or empty directory named by `path`.
    pub fn remove(&self, cwd: Option<&InodeRef>, path: &str) -> FsResult<()> {
        let root = self.root_dir()?;
        let (dir, name) = path::resolve_parent(self, &root, cwd, path)?;
        inode::close(self, root);
        let result = if name.is_empty() {
            Err(FsError::Invalid)
        } else {
            directory::remove(self, &dir, name)
        };
        inode::close(self, dir);
        result
    }

    /// Resolves `path` to a new current-directory reference, leaving the
    /// caller's previous `cwd` reference untouched (the caller closes it).
    pub fn change_dir(&self, cwd: Option<&InodeRef>, path: &str) -> FsResult<InodeRef> {
        let root = self.root_dir()?;
        let resolved = path::resolve(self, &root, cwd, path);
        inode::close(self, root);
        let target = resolved?;
        let is_dir = target.lock().unwrap().is_dir();
        if !is_dir {
            inode::close(self, target);
            return Err(FsError::NotDirectory);
        }
        Ok(target)
    }

    /// Returns a fresh reference to the task's current directory, or the
    /// root if `cwd` is `None`.
    pub fn get_dir(&self, cwd: Option<&InodeRef>) -> FsResult<InodeRef> {
        match cwd {
            Some(c) => Ok(inode::reopen(self, c)),
            None => self.root_dir(),
        }
    }

    /// Returns an owned copy of `path`'s last component, the filesystem's
    /// answer to "what file does this path name" without exposing a
    /// pointer into any internal buffer.
    pub fn get_file(&self, path: &str) -> FsResult<String> {
        let name = path.rsplit('/').find(|s| !s.is_empty());
        name.map(str::to_string).ok_or(FsError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;

    fn test_disk(sectors: u32) -> Arc<dyn BlockDevice> {
        Arc::new(MemDisk::new(sectors))
    }

    #[test]
    fn format_then_mount_preserves_free_map() {
        let disk = test_disk(256);
        let fs = FileSystem::format(Arc::clone(&disk)).unwrap();
        fs.create(None, "/a", 10).unwrap();
        fs.unmount().unwrap();

        let remounted = FileSystem::mount(disk).unwrap();
        let root = remounted.root_dir().unwrap();
        let found = directory::lookup(&remounted, &root, "a").unwrap();
        assert_eq!(inode::length(&found), 10);
        inode::close(&remounted, found);
        inode::close(&remounted, root);
    }

    #[test]
    fn create_rejects_dot_and_dotdot() {
        let fs = FileSystem::format(test_disk(64)).unwrap();
        assert_eq!(fs.create(None, "/.", 0), Err(FsError::Invalid));
        assert_eq!(fs.create(None, "/..", 0), Err(FsError::Invalid));
    }

    #[test]
    fn create_open_write_read_round_trips() {
        let fs = FileSystem::format(test_disk(64)).unwrap();
        fs.create(None, "/a", 0).unwrap();
        let h = fs.open(None, "/a").unwrap();
        let n = inode::write_at(&fs, &h, b"hello", 0).unwrap();
        assert_eq!(n, 5);
        inode::close(&fs, h);
    }

    #[test]
    fn mkdir_chdir_relative_create_scenario() {
        let fs = FileSystem::format(test_disk(64)).unwrap();
        fs.mkdir(None, "/d").unwrap();
        let d = fs.change_dir(None, "/d").unwrap();
        fs.create(Some(&d), "f", 10).unwrap();
        let parent = fs.change_dir(Some(&d), "..").unwrap();
        inode::close(&fs, d);

        let opened = fs.open(Some(&parent), "/d/f");
        assert!(opened.is_ok());
        inode::close(&fs, opened.unwrap());

        assert!(fs.open(Some(&parent), "f").is_err());
        inode::close(&fs, parent);
    }

    #[test]
    fn remove_refuses_root() {
        let fs = FileSystem::format(test_disk(64)).unwrap();
        assert_eq!(fs.remove(None, "/"), Err(FsError::Invalid));
    }

    #[test]
    fn get_file_returns_last_component() {
        let fs = FileSystem::format(test_disk(64)).unwrap();
        assert_eq!(fs.get_file("/a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(fs.get_file("c.txt").unwrap(), "c.txt");
        assert_eq!(fs.get_file("/"), Err(FsError::Invalid));
    }
}
