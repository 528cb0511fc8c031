//! Splits a `/`-delimited path and walks directories to resolve it to a
//! `(parent directory, final component)` pair, leaving interpretation of
//! the final component (which may itself be `.` or `..`) to the caller.

use crate::directory;
use crate::error::{FsError, FsResult};
use crate::fs::FileSystem;
use crate::inode::{self, InodeRef};

/// Splits `path` into non-empty components, ignoring repeated `/`.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Advances through an *interior* path component, where the result must
/// itself be a directory to keep walking through.
fn step(fs: &FileSystem, dir: InodeRef, component: &str) -> FsResult<InodeRef> {
    let next = step_terminal(fs, dir, component)?;
    if !next.lock().unwrap().is_dir() {
        inode::close(fs, next);
        return Err(FsError::NotDirectory);
    }
    Ok(next)
}

/// Advances through a single component without requiring the result to be
/// a directory — used for the terminal component of a path, which may name
/// a plain file.
fn step_terminal(fs: &FileSystem, dir: InodeRef, component: &str) -> FsResult<InodeRef> {
    match component {
        "." => Ok(dir),
        ".." => {
            let parent_sector = dir.lock().unwrap().parent();
            inode::close(fs, dir);
            inode::open(fs, parent_sector)
        }
        name => {
            let next = directory::lookup(fs, &dir, name)?;
            inode::close(fs, dir);
            Ok(next)
        }
    }
}

/// Resolves `path` to the directory that should contain its final
/// component, plus that component's name. The starting directory is
/// `root` for absolute paths, `cwd` (or `root` if `cwd` is `None`) for
/// relative ones. The returned directory is a fresh open reference the
/// caller must close.
pub fn resolve_parent<'a>(
    fs: &FileSystem,
    root: &InodeRef,
    cwd: Option<&InodeRef>,
    path: &'a str,
) -> FsResult<(InodeRef, &'a str)> {
    let parts = components(path);
    let mut dir = if path.starts_with('/') {
        inode::reopen(fs, root)
    } else {
        match cwd {
            Some(c) => inode::reopen(fs, c),
            None => inode::reopen(fs, root),
        }
    };

    let Some((last, init)) = parts.split_last() else {
        return Ok((dir, ""));
    };
    for comp in init {
        dir = step(fs, dir, comp)?;
    }
    Ok((dir, last))
}

/// Resolves `path` fully, returning the opened inode it names. Interior
/// `.`/`..` and trailing `.`/`..` are all honored.
pub fn resolve(
    fs: &FileSystem,
    root: &InodeRef,
    cwd: Option<&InodeRef>,
    path: &str,
) -> FsResult<InodeRef> {
    let (dir, name) = resolve_parent(fs, root, cwd, path)?;
    if name.is_empty() {
        return Ok(dir);
    }
    step_terminal(fs, dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use std::sync::Arc;

    fn test_fs(sectors: u32) -> FileSystem {
        FileSystem::format(Arc::new(MemDisk::new(sectors))).unwrap()
    }

    #[test]
    fn resolves_nested_absolute_path() {
        let fs = test_fs(256);
        let root = fs.root_dir().unwrap();
        let root_sector = root.lock().unwrap().sector();

        let sub_sector = fs.free_map.lock().unwrap().allocate(1).unwrap();
        directory::create(&fs, sub_sector, 4, root_sector).unwrap();
        directory::add(&fs, &root, "d", sub_sector).unwrap();

        let resolved = resolve(&fs, &root, None, "/d").unwrap();
        assert_eq!(resolved.lock().unwrap().sector(), sub_sector);
        inode::close(&fs, resolved);
        inode::close(&fs, root);
    }

    #[test]
    fn dot_dot_reaches_parent() {
        let fs = test_fs(256);
        let root = fs.root_dir().unwrap();
        let root_sector = root.lock().unwrap().sector();

        let sub_sector = fs.free_map.lock().unwrap().allocate(1).unwrap();
        directory::create(&fs, sub_sector, 4, root_sector).unwrap();
        directory::add(&fs, &root, "d", sub_sector).unwrap();

        let sub_again = resolve(&fs, &root, None, "/d").unwrap();
        let back = resolve(&fs, &root, Some(&sub_again), "..").unwrap();
        assert_eq!(back.lock().unwrap().sector(), root_sector);
        inode::close(&fs, sub_again);
        inode::close(&fs, back);
        inode::close(&fs, root);
    }
}
