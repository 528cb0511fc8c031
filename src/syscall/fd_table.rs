//! Per-process file-descriptor table.
//!
//! Mirrors the source's `file_pointer { file, name, resource, owner }`
//! array: each slot pairs an open [`File`] with the task that installed it
//! and a readers-first gate so concurrent readers never block each other
//! while a writer still has exclusive access.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::task::TaskId;

/// Slots 0 and 1 are reserved for stdin/stdout and never installed into.
pub const RESERVED_FDS: usize = 2;

/// Total addressable file descriptors per process, reserved slots included.
pub const FD_TABLE_CAPACITY: usize = 128;

#[derive(Default)]
struct GateState {
    readers: u32,
    writer: bool,
}

/// A readers-first lock: any number of readers proceed concurrently: a
/// writer waits for all of them to drain and excludes further readers and
/// writers while held. New readers are admitted ahead of a waiting writer,
/// so a write can starve under continuous reads. That is the documented
/// trade-off, not a bug.
struct RwGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

impl RwGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            drained: Condvar::new(),
        }
    }

    fn read_lock(&self) {
        let mut s = self.state.lock().unwrap();
        while s.writer {
            s = self.drained.wait(s).unwrap();
        }
        s.readers += 1;
    }

    fn read_unlock(&self) {
        let mut s = self.state.lock().unwrap();
        s.readers -= 1;
        if s.readers == 0 {
            self.drained.notify_all();
        }
    }

    fn write_lock(&self) {
        let mut s = self.state.lock().unwrap();
        while s.writer || s.readers > 0 {
            s = self.drained.wait(s).unwrap();
        }
        s.writer = true;
    }

    fn write_unlock(&self) {
        let mut s = self.state.lock().unwrap();
        s.writer = false;
        self.drained.notify_all();
    }
}

/// One occupied file-descriptor slot.
pub struct FdSlot {
    pub name: String,
    pub owner: TaskId,
    gate: RwGate,
    file: Mutex<Option<File>>,
}

/// A process's file-descriptor table: fixed capacity, slots 0/1 reserved.
pub struct FdTable {
    slots: Mutex<Vec<Option<Arc<FdSlot>>>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    /// Creates a table with every slot empty.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(FD_TABLE_CAPACITY);
        slots.resize_with(FD_TABLE_CAPACITY, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Installs `file` into the lowest free non-reserved slot.
    pub fn install(&self, file: File, name: String, owner: TaskId) -> FsResult<usize> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots[RESERVED_FDS..]
            .iter()
            .position(|s| s.is_none())
            .map(|i| i + RESERVED_FDS)
            .ok_or(FsError::TooManyOpenFile)?;
        slots[idx] = Some(Arc::new(FdSlot {
            name,
            owner,
            gate: RwGate::new(),
            file: Mutex::new(Some(file)),
        }));
        Ok(idx)
    }

    fn slot(&self, fd: usize) -> FsResult<Arc<FdSlot>> {
        self.slots
            .lock()
            .unwrap()
            .get(fd)
            .and_then(|s| s.clone())
            .ok_or(FsError::BadFileDescriptor)
    }

    /// Runs `f` with shared (read) access to the file at `fd`. Any number of
    /// concurrent readers on the same fd run without blocking each other.
    pub fn with_read<T>(&self, fd: usize, f: impl FnOnce(&mut File) -> T) -> FsResult<T> {
        let slot = self.slot(fd)?;
        slot.gate.read_lock();
        let result = {
            let mut guard = slot.file.lock().unwrap();
            match guard.as_mut() {
                Some(file) => Ok(f(file)),
                None => Err(FsError::BadFileDescriptor),
            }
        };
        slot.gate.read_unlock();
        result
    }

    /// Runs `f` with exclusive (write) access to the file at `fd`.
    pub fn with_write<T>(&self, fd: usize, f: impl FnOnce(&mut File) -> T) -> FsResult<T> {
        let slot = self.slot(fd)?;
        slot.gate.write_lock();
        let result = {
            let mut guard = slot.file.lock().unwrap();
            match guard.as_mut() {
                Some(file) => Ok(f(file)),
                None => Err(FsError::BadFileDescriptor),
            }
        };
        slot.gate.write_unlock();
        result
    }

    /// Vacates `fd` and returns the [`File`] it held, refusing unless
    /// `owner` is the task that installed it. Waits for any in-flight
    /// readers/writers on the slot to drain first.
    pub fn close(&self, fd: usize, owner: TaskId) -> FsResult<File> {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            let entry = slots.get_mut(fd).ok_or(FsError::BadFileDescriptor)?;
            let slot = entry.as_ref().ok_or(FsError::BadFileDescriptor)?;
            if slot.owner != owner {
                return Err(FsError::Denied);
            }
            entry.take().unwrap()
        };
        slot.gate.write_lock();
        let file = slot.file.lock().unwrap().take();
        slot.gate.write_unlock();
        file.ok_or(FsError::BadFileDescriptor)
    }

    /// Closes every occupied slot belonging to `owner`, ascending by fd, for
    /// task-exit cleanup. Returns the recovered files in fd order.
    pub fn close_all_owned_by(&self, owner: TaskId) -> Vec<File> {
        let mut out = Vec::new();
        for fd in RESERVED_FDS..FD_TABLE_CAPACITY {
            if let Ok(file) = self.close(fd, owner) {
                out.push(file);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::fs::FileSystem;
    use std::sync::Arc as StdArc;

    fn test_fs(sectors: u32) -> FileSystem {
        FileSystem::format(StdArc::new(MemDisk::new(sectors))).unwrap()
    }

    #[test]
    fn install_assigns_first_free_slot_above_reserved() {
        let fs = test_fs(64);
        fs.create(None, "/a", 0).unwrap();
        let inode = fs.open(None, "/a").unwrap();
        let table = FdTable::new();
        let fd = table.install(File::open(inode), "a".into(), 1).unwrap();
        assert_eq!(fd, RESERVED_FDS);
    }

    #[test]
    fn close_by_non_owner_is_denied() {
        let fs = test_fs(64);
        fs.create(None, "/a", 0).unwrap();
        let inode = fs.open(None, "/a").unwrap();
        let table = FdTable::new();
        let fd = table.install(File::open(inode), "a".into(), 1).unwrap();
        assert_eq!(table.close(fd, 2).unwrap_err(), FsError::Denied);
        let file = table.close(fd, 1).unwrap();
        file.close(&fs);
    }

    #[test]
    fn close_vacates_slot_for_reuse() {
        let fs = test_fs(64);
        fs.create(None, "/a", 0).unwrap();
        let inode_a = fs.open(None, "/a").unwrap();
        let table = FdTable::new();
        let fd = table.install(File::open(inode_a), "a".into(), 1).unwrap();
        table.close(fd, 1).unwrap().close(&fs);

        fs.create(None, "/b", 0).unwrap();
        let inode_b = fs.open(None, "/b").unwrap();
        let fd2 = table.install(File::open(inode_b), "b".into(), 1).unwrap();
        assert_eq!(fd, fd2);
    }

    #[test]
    fn operating_on_closed_fd_is_bad_descriptor() {
        let table = FdTable::new();
        assert_eq!(
            table.with_read(RESERVED_FDS, |_| ()).unwrap_err(),
            FsError::BadFileDescriptor
        );
    }
}
