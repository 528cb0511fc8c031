//! An inode-based file system for a small teaching operating system: a
//! sector-addressed block device, files growing to 8 MiB via multi-level
//! indirection, a hierarchical directory namespace, and the
//! file-descriptor table and syscalls that expose it to tasks.

pub mod directory;
pub mod disk;
pub mod error;
pub mod file;
pub mod free_map;
pub mod fs;
pub mod inode;
pub mod path;
pub mod syscall;
pub mod task;

pub use disk::{BlockDevice, MemDisk};
pub use error::{FsError, FsResult};
pub use file::File;
pub use fs::FileSystem;
pub use syscall::{fd_table::FdTable, Process, Request, Syscalls, UserPtr, UserPtrMut};
pub use task::{SimpleTask, Task, TaskId};
