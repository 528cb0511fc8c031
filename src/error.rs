//! The error type threaded through every fallible filesystem operation.
//!
//! Mirrors the shape of a POSIX errno table: one variant per failure kind,
//! with a conversion to the negative-`isize` convention the syscall layer
//! returns to user code.

use core::fmt;

/// A filesystem operation failure.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum FsError {
    /// A user-supplied pointer did not map into the caller's address space.
    BadAddress,
    /// A path component, file descriptor, or directory entry does not exist.
    NotFound,
    /// `dir_add` (or `filesys_create`) targeted a name that is already present.
    AlreadyExists,
    /// A name was empty, too long, `.`/`..` where disallowed, or a path
    /// component that should be a directory was not one.
    Invalid,
    /// Write attempted while `deny_write_count > 0`, or `close` attempted by
    /// a task that does not own the descriptor.
    Denied,
    /// The free-map could not satisfy a sector allocation.
    NoSpace,
    /// A path component that should be a directory is not one.
    NotDirectory,
    /// `dir_remove` targeted a non-empty directory.
    DirectoryNotEmpty,
    /// `dir_remove` targeted a directory some task still has as its `cwd`.
    Busy,
    /// A file descriptor index is out of range or unused.
    BadFileDescriptor,
    /// The per-process file-descriptor table is full.
    TooManyOpenFile,
    /// An on-disk inode's magic number did not match on read.
    FilesystemCorrupted(&'static str),
    /// The operation (e.g. `exec`/`wait`) has no backing task collaborator.
    NotSupportedOperation,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::BadAddress => write!(f, "bad user address"),
            FsError::NotFound => write!(f, "no such file or directory"),
            FsError::AlreadyExists => write!(f, "file exists"),
            FsError::Invalid => write!(f, "invalid argument"),
            FsError::Denied => write!(f, "permission denied"),
            FsError::NoSpace => write!(f, "no space left on device"),
            FsError::NotDirectory => write!(f, "not a directory"),
            FsError::DirectoryNotEmpty => write!(f, "directory not empty"),
            FsError::Busy => write!(f, "device or resource busy"),
            FsError::BadFileDescriptor => write!(f, "bad file descriptor"),
            FsError::TooManyOpenFile => write!(f, "too many open files"),
            FsError::FilesystemCorrupted(why) => write!(f, "filesystem corrupted: {why}"),
            FsError::NotSupportedOperation => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for FsError {}

impl FsError {
    /// Converts this error into the negative `errno`-style code surfaced by
    /// a syscall's return value.
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::BadAddress => -14,
            FsError::NotFound => -2,
            FsError::AlreadyExists => -17,
            FsError::Invalid => -22,
            FsError::Denied => -13,
            FsError::NoSpace => -28,
            FsError::NotDirectory => -20,
            FsError::DirectoryNotEmpty => -39,
            FsError::Busy => -16,
            FsError::BadFileDescriptor => -9,
            FsError::TooManyOpenFile => -24,
            FsError::FilesystemCorrupted(_) => -117,
            FsError::NotSupportedOperation => -524,
        }
    }

    /// Recovers an [`FsError`] from an errno-style code, for round-tripping
    /// through the syscall boundary. `FilesystemCorrupted` loses its message.
    pub fn from_errno(code: i32) -> Option<Self> {
        Some(match code {
            -14 => FsError::BadAddress,
            -2 => FsError::NotFound,
            -17 => FsError::AlreadyExists,
            -22 => FsError::Invalid,
            -13 => FsError::Denied,
            -28 => FsError::NoSpace,
            -20 => FsError::NotDirectory,
            -39 => FsError::DirectoryNotEmpty,
            -16 => FsError::Busy,
            -9 => FsError::BadFileDescriptor,
            -24 => FsError::TooManyOpenFile,
            -117 => FsError::FilesystemCorrupted(""),
            -524 => FsError::NotSupportedOperation,
            _ => return None,
        })
    }
}

/// Convenience alias used throughout the crate.
pub type FsResult<T> = Result<T, FsError>;
