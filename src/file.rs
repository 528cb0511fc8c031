//! An open-file handle: a cursor and write-deny flag layered over a shared
//! inode reference. Multiple handles may share one in-memory inode.

use crate::disk::SectorNo;
use crate::error::FsResult;
use crate::fs::FileSystem;
use crate::inode::{self, InodeRef};

/// A single open file: a cursor position over a shared inode reference.
#[derive(Debug)]
pub struct File {
    inode: InodeRef,
    pos: u32,
    deny_write: bool,
}

impl File {
    /// Takes ownership of `inode` (the caller's `inode::reopen`, if shared,
    /// must already have happened) and opens it for I/O at position 0.
    pub fn open(inode: InodeRef) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    pub fn sector(&self) -> SectorNo {
        self.inode.lock().unwrap().sector()
    }

    pub fn is_dir(&self) -> bool {
        self.inode.lock().unwrap().is_dir()
    }

    /// Releases the underlying inode reference, re-enabling writes first if
    /// this handle had denied them.
    pub fn close(mut self, fs: &FileSystem) {
        if self.deny_write {
            inode::allow_write(&self.inode);
            self.deny_write = false;
        }
        inode::close(fs, self.inode.clone());
    }

    /// Reads up to `buf.len()` bytes at the current position, advancing it
    /// by the number of bytes actually read.
    pub fn read(&mut self, fs: &FileSystem, buf: &mut [u8]) -> usize {
        let n = inode::read_at(fs, &self.inode, buf, self.pos);
        self.pos += n as u32;
        n
    }

    /// Writes `buf` at the current position, advancing it by the number of
    /// bytes actually written.
    pub fn write(&mut self, fs: &FileSystem, buf: &[u8]) -> FsResult<usize> {
        let n = inode::write_at(fs, &self.inode, buf, self.pos)?;
        self.pos += n as u32;
        Ok(n)
    }

    pub fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    pub fn length(&self) -> u32 {
        inode::length(&self.inode)
    }

    pub fn deny_write(&mut self) {
        if !self.deny_write {
            inode::deny_write(&self.inode);
            self.deny_write = true;
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            inode::allow_write(&self.inode);
            self.deny_write = false;
        }
    }
}
