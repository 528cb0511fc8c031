//! Per-task file state and the thirteen filesystem-facing syscalls, the
//! layer user tasks actually call through.

pub mod fd_table;

use std::sync::Mutex;

use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::fs::FileSystem;
use crate::inode::{self, InodeRef};
use crate::task::{Task, TaskId};

use fd_table::FdTable;

/// Standard output fd, reserved and never installed into the table proper.
pub const STDOUT_FD: usize = 1;

/// Console writes larger than this are truncated, matching the source's
/// per-call cap on direct-to-console `write`.
pub const CONSOLE_WRITE_CAP: usize = 300;

/// The thirteen syscall numbers, matching the dispatch table.
pub mod numbers {
    pub const HALT: u32 = 0;
    pub const EXIT: u32 = 1;
    pub const EXEC: u32 = 2;
    pub const WAIT: u32 = 3;
    pub const CREATE: u32 = 4;
    pub const REMOVE: u32 = 5;
    pub const OPEN: u32 = 6;
    pub const FILESIZE: u32 = 7;
    pub const READ: u32 = 8;
    pub const WRITE: u32 = 9;
    pub const SEEK: u32 = 10;
    pub const TELL: u32 = 11;
    pub const CLOSE: u32 = 12;
}

/// A read-only user-space pointer. This crate models no real address
/// space, so a `UserPtr` already carries the bytes it names; it exists
/// only once its nominal address has cleared `valid_user_ptr`, mirroring
/// the source's `is_good_ptr` guard ahead of every dereference.
pub struct UserPtr<'a> {
    bytes: &'a [u8],
}

impl<'a> UserPtr<'a> {
    pub fn new(
        addr: usize,
        bytes: &'a [u8],
        valid_user_ptr: &dyn Fn(usize) -> bool,
    ) -> FsResult<Self> {
        if valid_user_ptr(addr) {
            Ok(Self { bytes })
        } else {
            Err(FsError::BadAddress)
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn as_cstr(&self) -> FsResult<&'a str> {
        std::str::from_utf8(self.bytes).map_err(|_| FsError::BadAddress)
    }
}

/// Write-target counterpart of [`UserPtr`], for syscalls that fill a
/// caller-owned buffer (`read`).
pub struct UserPtrMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> UserPtrMut<'a> {
    pub fn new(
        addr: usize,
        bytes: &'a mut [u8],
        valid_user_ptr: &dyn Fn(usize) -> bool,
    ) -> FsResult<Self> {
        if valid_user_ptr(addr) {
            Ok(Self { bytes })
        } else {
            Err(FsError::BadAddress)
        }
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        self.bytes
    }
}

/// A fully decoded syscall request: one variant per row of the dispatch
/// table, every pointer argument already validated into a [`UserPtr`] or
/// [`UserPtrMut`] by the caller before it reaches [`Syscalls::dispatch`].
pub enum Request<'a> {
    Halt,
    Exit(i32),
    Exec(UserPtr<'a>),
    Wait(i32),
    Create(UserPtr<'a>, u32),
    Remove(UserPtr<'a>),
    Open(UserPtr<'a>),
    Filesize(usize),
    Read(usize, UserPtrMut<'a>),
    Write(usize, UserPtr<'a>),
    Seek(usize, u32),
    Tell(usize),
    Close(usize),
    /// No syscall has this number, or its argument words didn't decode
    /// into any of the above shapes.
    Unknown,
}

impl<'a> Request<'a> {
    fn number(&self) -> Option<u32> {
        use numbers::*;
        Some(match self {
            Request::Halt => HALT,
            Request::Exit(_) => EXIT,
            Request::Exec(_) => EXEC,
            Request::Wait(_) => WAIT,
            Request::Create(..) => CREATE,
            Request::Remove(_) => REMOVE,
            Request::Open(_) => OPEN,
            Request::Filesize(_) => FILESIZE,
            Request::Read(..) => READ,
            Request::Write(..) => WRITE,
            Request::Seek(..) => SEEK,
            Request::Tell(_) => TELL,
            Request::Close(_) => CLOSE,
            Request::Unknown => return None,
        })
    }
}

/// Per-task filesystem state: current directory and file-descriptor table.
/// One of these backs every task that can reach the syscalls below.
pub struct Process<T: Task> {
    pub task: T,
    cwd: Mutex<Option<InodeRef>>,
    pub fds: FdTable,
}

impl<T: Task> Process<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            cwd: Mutex::new(None),
            fds: FdTable::new(),
        }
    }

    fn cwd_ref(&self) -> Option<InodeRef> {
        self.cwd.lock().unwrap().clone()
    }
}

impl<T: Task> Drop for Process<T> {
    fn drop(&mut self) {
        if self.cwd.lock().unwrap().is_some() {
            log::warn!(
                "task {} dropped without chdir-ing back to release its current directory",
                self.task.id()
            );
        }
    }
}

/// The FS-facing syscall dispatcher: the façade plus the global mutex held
/// across every call that reaches it, per the concurrency model.
pub struct Syscalls<'a> {
    fs: &'a FileSystem,
    global: Mutex<()>,
}

impl<'a> Syscalls<'a> {
    pub fn new(fs: &'a FileSystem) -> Self {
        Self {
            fs,
            global: Mutex::new(()),
        }
    }

    /// Syscall 0: halt. Out of scope to actually power off anything here;
    /// just flushes the free-map the way a real `shutdown` would.
    pub fn halt(&self) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        self.fs.unmount()
    }

    /// Syscall 1: exit. Prints the task's status line; negative statuses
    /// are normalized to -1 as the source does.
    pub fn exit<T: Task>(&self, process: &Process<T>, status: i32) {
        let status = if status < 0 { -1 } else { status };
        println!("{}: exit({status})", process.task.name());
        for file in process.fds.close_all_owned_by(process.task.id()) {
            file.close(self.fs);
        }
        if let Some(cwd) = process.cwd.lock().unwrap().take() {
            inode::close(self.fs, cwd);
        }
    }

    /// Syscalls 2/3: exec/wait. Delegate to the task/thread subsystem,
    /// which this crate does not implement.
    pub fn exec(&self, _cmd: &str) -> FsResult<i32> {
        Err(FsError::NotSupportedOperation)
    }

    pub fn wait(&self, _pid: i32) -> FsResult<i32> {
        Err(FsError::NotSupportedOperation)
    }

    /// Syscall 4: create.
    pub fn create<T: Task>(&self, process: &Process<T>, path: &str, size: u32) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        let cwd = process.cwd_ref();
        self.fs.create(cwd.as_ref(), path, size)
    }

    /// Syscall 5: remove.
    pub fn remove<T: Task>(&self, process: &Process<T>, path: &str) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        let cwd = process.cwd_ref();
        self.fs.remove(cwd.as_ref(), path)
    }

    /// Syscall 6: open. Returns the assigned fd (>= 2).
    pub fn open<T: Task>(&self, process: &Process<T>, path: &str) -> FsResult<usize> {
        let _guard = self.global.lock().unwrap();
        let cwd = process.cwd_ref();
        let inode = self.fs.open(cwd.as_ref(), path)?;
        let name = self.fs.get_file(path).unwrap_or_default();
        process
            .fds
            .install(File::open(inode), name, process.task.id())
    }

    /// Syscall 7: filesize.
    pub fn filesize<T: Task>(&self, process: &Process<T>, fd: usize) -> FsResult<u32> {
        let _guard = self.global.lock().unwrap();
        process.fds.with_read(fd, |file| file.length())
    }

    /// Syscall 8: read. Fd 0 (stdin) and fd 1 (stdout) are not valid read
    /// targets here; only installed files are readable.
    pub fn read<T: Task>(&self, process: &Process<T>, fd: usize, buf: &mut [u8]) -> FsResult<usize> {
        process.fds.with_read(fd, |file| file.read(self.fs, buf))
    }

    /// Syscall 9: write. Fd 1 goes to the console, capped at
    /// [`CONSOLE_WRITE_CAP`] bytes per call; other fds go through the
    /// installed file.
    pub fn write<T: Task>(&self, process: &Process<T>, fd: usize, buf: &[u8]) -> FsResult<usize> {
        if fd == STDOUT_FD {
            let chunk = &buf[..buf.len().min(CONSOLE_WRITE_CAP)];
            print!("{}", String::from_utf8_lossy(chunk));
            return Ok(chunk.len());
        }
        process.fds.with_write(fd, |file| file.write(self.fs, buf))?
    }

    /// Syscall 10: seek.
    pub fn seek<T: Task>(&self, process: &Process<T>, fd: usize, pos: u32) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        process.fds.with_write(fd, |file| file.seek(pos))
    }

    /// Syscall 11: tell.
    pub fn tell<T: Task>(&self, process: &Process<T>, fd: usize) -> FsResult<u32> {
        let _guard = self.global.lock().unwrap();
        process.fds.with_read(fd, |file| file.tell())
    }

    /// Syscall 12: close. Only the task that opened `fd` may close it.
    pub fn close<T: Task>(&self, process: &Process<T>, fd: usize) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        let file = process.fds.close(fd, process.task.id())?;
        file.close(self.fs);
        Ok(())
    }

    /// `mkdir`, not numbered in the syscall table but exposed the same way
    /// `create` is, per the path resolver's directory-creation path.
    pub fn mkdir<T: Task>(&self, process: &Process<T>, path: &str) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        let cwd = process.cwd_ref();
        self.fs.mkdir(cwd.as_ref(), path)
    }

    /// `chdir`: resolves `path` and, on success, swaps it in as the task's
    /// current directory, closing the previous one.
    pub fn chdir<T: Task>(&self, process: &Process<T>, path: &str) -> FsResult<()> {
        let _guard = self.global.lock().unwrap();
        let old = process.cwd_ref();
        let new_dir = self.fs.change_dir(old.as_ref(), path)?;
        let previous = process.cwd.lock().unwrap().replace(new_dir);
        if let Some(prev) = previous {
            inode::close(self.fs, prev);
        }
        Ok(())
    }

    /// The single entry point a trap handler calls: dispatches by syscall
    /// `number`, matching it against the shape of `request`. A `number`
    /// with no corresponding `Request` variant, or a `request` asserting a
    /// different number than the one the trap actually raised, terminates
    /// the task with status -1 — a protocol violation, the same as the
    /// source's `default: exit(-1)` arm and its `is_good_ptr` checks.
    pub fn dispatch<T: Task>(&self, process: &Process<T>, number: u32, request: Request) -> i32 {
        if request.number() != Some(number) {
            self.exit(process, -1);
            return -1;
        }
        match request {
            Request::Halt => {
                let _ = self.halt();
                0
            }
            Request::Exit(status) => {
                self.exit(process, status);
                0
            }
            Request::Exec(cmd) => match cmd.as_cstr() {
                Ok(s) => self.exec(s).unwrap_or(-1),
                Err(_) => {
                    self.exit(process, -1);
                    -1
                }
            },
            Request::Wait(pid) => self.wait(pid).unwrap_or(-1),
            Request::Create(path, size) => match path.as_cstr() {
                Ok(s) => self.create(process, s, size).is_ok() as i32,
                Err(_) => {
                    self.exit(process, -1);
                    -1
                }
            },
            Request::Remove(path) => match path.as_cstr() {
                Ok(s) => self.remove(process, s).is_ok() as i32,
                Err(_) => {
                    self.exit(process, -1);
                    -1
                }
            },
            Request::Open(path) => match path.as_cstr() {
                Ok(s) => self.open(process, s).map(|fd| fd as i32).unwrap_or(-1),
                Err(_) => {
                    self.exit(process, -1);
                    -1
                }
            },
            Request::Filesize(fd) => self.filesize(process, fd).map(|n| n as i32).unwrap_or(-1),
            Request::Read(fd, mut buf) => self
                .read(process, fd, buf.as_mut_bytes())
                .map(|n| n as i32)
                .unwrap_or(-1),
            Request::Write(fd, buf) => self
                .write(process, fd, buf.as_bytes())
                .map(|n| n as i32)
                .unwrap_or(-1),
            Request::Seek(fd, pos) => {
                let _ = self.seek(process, fd, pos);
                0
            }
            Request::Tell(fd) => self.tell(process, fd).map(|n| n as i32).unwrap_or(-1),
            Request::Close(fd) => {
                let _ = self.close(process, fd);
                0
            }
            Request::Unknown => -1, // number check above already diverted this
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::task::SimpleTask;
    use std::sync::Arc;

    fn test_fs(sectors: u32) -> FileSystem {
        FileSystem::format(Arc::new(MemDisk::new(sectors))).unwrap()
    }

    #[test]
    fn create_open_write_seek_read_round_trips() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));

        sc.create(&process, "/a", 0).unwrap();
        let fd = sc.open(&process, "/a").unwrap();
        assert!(fd >= 2);

        let n = sc.write(&process, fd, b"hello").unwrap();
        assert_eq!(n, 5);
        sc.seek(&process, fd, 0).unwrap();
        let mut buf = [0u8; 5];
        let n = sc.read(&process, fd, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(sc.filesize(&process, fd).unwrap(), 5);

        sc.close(&process, fd).unwrap();
    }

    #[test]
    fn close_by_non_owner_fails() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let owner = Process::new(SimpleTask::new(1, "owner"));
        let other = Process::new(SimpleTask::new(2, "other"));

        sc.create(&owner, "/a", 0).unwrap();
        let fd = sc.open(&owner, "/a").unwrap();

        assert_eq!(
            other.fds.close(fd, other.task.id()).unwrap_err(),
            FsError::BadFileDescriptor
        );
        sc.close(&owner, fd).unwrap();
    }

    #[test]
    fn mkdir_chdir_then_relative_create() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));

        sc.mkdir(&process, "/d").unwrap();
        sc.chdir(&process, "/d").unwrap();
        sc.create(&process, "f", 10).unwrap();
        sc.chdir(&process, "..").unwrap();

        let fd = sc.open(&process, "/d/f").unwrap();
        sc.close(&process, fd).unwrap();
        assert!(sc.open(&process, "f").is_err());
    }

    #[test]
    fn exit_closes_owned_descriptors() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));
        sc.create(&process, "/a", 0).unwrap();
        sc.open(&process, "/a").unwrap();
        sc.exit(&process, 0);
    }

    fn always_valid(_addr: usize) -> bool {
        true
    }

    #[test]
    fn dispatch_create_open_write_seek_read_close() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));
        let valid: &dyn Fn(usize) -> bool = &always_valid;

        let path = UserPtr::new(0x1000, b"/a", valid).unwrap();
        let r = sc.dispatch(&process, numbers::CREATE, Request::Create(path, 0));
        assert_eq!(r, 1);

        let path = UserPtr::new(0x1000, b"/a", valid).unwrap();
        let fd = sc.dispatch(&process, numbers::OPEN, Request::Open(path));
        assert!(fd >= 2);
        let fd = fd as usize;

        let write_buf = UserPtr::new(0x2000, b"hello", valid).unwrap();
        let n = sc.dispatch(&process, numbers::WRITE, Request::Write(fd, write_buf));
        assert_eq!(n, 5);

        sc.dispatch(&process, numbers::SEEK, Request::Seek(fd, 0));

        let mut backing = [0u8; 5];
        let read_buf = UserPtrMut::new(0x3000, &mut backing, valid).unwrap();
        let n = sc.dispatch(&process, numbers::READ, Request::Read(fd, read_buf));
        assert_eq!(n, 5);
        assert_eq!(&backing, b"hello");

        sc.dispatch(&process, numbers::CLOSE, Request::Close(fd));
    }

    #[test]
    fn dispatch_rejects_bad_user_pointer() {
        fn always_invalid(_addr: usize) -> bool {
            false
        }
        let invalid: &dyn Fn(usize) -> bool = &always_invalid;

        assert!(matches!(
            UserPtr::new(0xdead, b"/a", invalid),
            Err(FsError::BadAddress)
        ));
    }

    #[test]
    fn dispatch_unknown_number_exits_task() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));

        let r = sc.dispatch(&process, 99, Request::Unknown);
        assert_eq!(r, -1);
    }

    #[test]
    fn dispatch_mismatched_request_number_exits_task() {
        let fs = test_fs(64);
        let sc = Syscalls::new(&fs);
        let process = Process::new(SimpleTask::new(1, "t"));

        // Claims to be syscall 0 (halt) but carries exit's argument shape.
        let r = sc.dispatch(&process, numbers::HALT, Request::Exit(0));
        assert_eq!(r, -1);
    }
}
