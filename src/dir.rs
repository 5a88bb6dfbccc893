//! Path-based operations: mkdir, rmdir, unlink, access, stat, chmod, chdir,
//! getcwd, and directory listing through a descriptor.

use alloc::{string::String, sync::Arc, vec::Vec};

use log::debug;
use serde::Serialize;

use crate::{
    common::{AccessCheck, InodeKind, Permission, Stat, F_OK},
    error::{FsError, FsResult},
    fs::Filesystem,
    fs_bail,
    inode::Inode,
    path::{absolute_path, resolve_parent, split_last},
    DIRENT_RECORD_SIZE, NAME_MAX,
};

pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;

/// One directory entry as returned by [`Filesystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dirent {
    pub ino: u64,
    /// Byte position of this record in the directory stream.
    pub off: i64,
    pub kind: InodeKind,
    pub name: String,
}

impl Dirent {
    fn new(node: &Inode, name: &str, index: usize) -> Self {
        Self {
            ino: node.ino(),
            off: (index * DIRENT_RECORD_SIZE) as i64,
            kind: node.kind(),
            name: String::from(name),
        }
    }

    pub fn d_type(&self) -> u8 {
        match self.kind {
            InodeKind::Directory => DT_DIR,
            InodeKind::File => DT_REG,
        }
    }

    /// Encode as a `linux_dirent64` record with a 256-byte name field.
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= DIRENT_RECORD_SIZE);
        let out = &mut out[..DIRENT_RECORD_SIZE];
        out.fill(0);
        out[0..8].copy_from_slice(&self.ino.to_le_bytes());
        out[8..16].copy_from_slice(&self.off.to_le_bytes());
        out[16..18].copy_from_slice(&(DIRENT_RECORD_SIZE as u16).to_le_bytes());
        out[18] = self.d_type();
        let name = self.name.as_bytes();
        let n = name.len().min(NAME_MAX);
        out[19..19 + n].copy_from_slice(&name[..n]);
    }
}

impl Filesystem {
    /// mkdir(2). Only the final component is created.
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        debug!("mkdir(pathname=\"{}\", mode={:#o})", path, mode);
        self.check_path("mkdir", path)?;

        let parent = match resolve_parent(&self.start_of(path), path) {
            Some(parent) => parent,
            None => fs_bail!("mkdir", FsError::NotFound, "a directory component in pathname does not exist"),
        };
        if !parent.is_dir() {
            fs_bail!("mkdir", FsError::NotDirectory, "a component used as a directory in pathname is not a directory");
        }
        let (_, name) = split_last(path);
        if matches!(name, "" | "." | "..") || parent.child(name).is_some() {
            fs_bail!("mkdir", FsError::Exists, "pathname already exists (not necessarily as a directory)");
        }
        if !parent.perm().writable() {
            fs_bail!("mkdir", FsError::PermissionDenied, "the parent directory does not allow write permission");
        }

        let dir = match self.allocator().create(name, InodeKind::Directory, Permission::from_bits_truncate(mode)) {
            Ok(dir) => dir,
            Err(e) => fs_bail!("mkdir", e, "the final component is too long"),
        };
        if let Err(e) = dir.link(&parent) {
            fs_bail!("mkdir", e, "pathname was created concurrently");
        }
        Ok(())
    }

    /// rmdir(2).
    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        debug!("rmdir(pathname=\"{}\")", path);
        self.check_path("rmdir", path)?;

        match split_last(path).1 {
            "." => fs_bail!("rmdir", FsError::Invalid, "pathname has . as last component"),
            ".." => fs_bail!("rmdir", FsError::NotEmpty, "pathname has .. as its final component"),
            _ => {}
        }
        let node = match self.lookup(path) {
            Some(node) => node,
            None => fs_bail!("rmdir", FsError::NotFound, "directory does not exist"),
        };
        if Arc::ptr_eq(&node, self.root()) || Arc::ptr_eq(&node, &self.cwd()) {
            fs_bail!("rmdir", FsError::Busy, "pathname is the root or the current directory");
        }
        if let Some(parent) = node.parent() {
            if !parent.perm().writable() {
                fs_bail!("rmdir", FsError::PermissionDenied, "write access to the directory containing pathname was not allowed");
            }
        }
        if !node.is_dir() {
            fs_bail!("rmdir", FsError::NotDirectory, "pathname is not a directory");
        }
        if let Err(e) = node.unlink_empty_dir() {
            fs_bail!("rmdir", e, "pathname contains entries other than . and ..");
        }
        Ok(())
    }

    /// unlink(2). Directories are refused with EISDIR whatever their state.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        debug!("unlink(pathname=\"{}\")", path);
        self.check_path("unlink", path)?;

        let node = match self.lookup(path) {
            Some(node) => node,
            None => fs_bail!("unlink", FsError::NotFound, "file does not exist"),
        };
        if let Some(parent) = node.parent() {
            if !parent.perm().writable() {
                fs_bail!("unlink", FsError::PermissionDenied, "write access to the directory containing pathname is not allowed");
            }
        }
        if !node.perm().contains(Permission::S_IWUSR) {
            if node.is_dir() {
                fs_bail!("unlink", FsError::IsDirectory, "directory deletion not permitted");
            }
            fs_bail!("unlink", FsError::NotPermitted, "file deletion not permitted");
        }
        if node.is_dir() {
            fs_bail!("unlink", FsError::IsDirectory, "pathname refers to a directory");
        }
        node.unlink();
        Ok(())
    }

    /// access(2). `mode` is `F_OK` or any mix of `R_OK`, `W_OK`, `X_OK`.
    pub fn access(&self, path: &str, mode: u32) -> FsResult<()> {
        debug!("access(pathname=\"{}\", mode={:#o})", path, mode);
        self.check_path("access", path)?;

        let check = match AccessCheck::from_bits(mode) {
            Some(check) => check,
            None => fs_bail!("access", FsError::Invalid, "mode was incorrectly specified"),
        };
        let node = match self.lookup(path) {
            Some(node) => node,
            None => fs_bail!("access", FsError::NotFound, "a component of pathname does not exist"),
        };
        if mode == F_OK {
            return Ok(());
        }
        let perm = node.perm();
        if check.contains(AccessCheck::R_OK) && !perm.readable() {
            fs_bail!("access", FsError::PermissionDenied, "read access would be denied to the file");
        }
        if check.contains(AccessCheck::W_OK) && !perm.writable() {
            fs_bail!("access", FsError::PermissionDenied, "write access would be denied to the file");
        }
        if check.contains(AccessCheck::X_OK) && !perm.executable() {
            fs_bail!("access", FsError::PermissionDenied, "execute access would be denied to the file");
        }
        Ok(())
    }

    /// stat(2).
    pub fn stat(&self, path: &str) -> FsResult<Stat> {
        self.check_path("stat", path)?;
        match self.lookup(path) {
            Some(node) => Ok(node.stat()),
            None => fs_bail!("stat", FsError::NotFound, "the file does not exist"),
        }
    }

    /// chmod(2).
    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        debug!("chmod(pathname=\"{}\", mode={:#o})", path, mode);
        self.check_path("chmod", path)?;
        match self.lookup(path) {
            Some(node) => {
                node.set_perm(Permission::from_bits_truncate(mode), self.now());
                Ok(())
            }
            None => fs_bail!("chmod", FsError::NotFound, "the file does not exist"),
        }
    }

    /// chdir(2).
    pub fn chdir(&self, path: &str) -> FsResult<()> {
        debug!("chdir(pathname=\"{}\")", path);
        self.check_path("chdir", path)?;
        let node = match self.lookup(path) {
            Some(node) => node,
            None => fs_bail!("chdir", FsError::NotFound, "the directory specified in path does not exist"),
        };
        if !node.is_dir() {
            fs_bail!("chdir", FsError::NotDirectory, "path is not a directory");
        }
        self.set_cwd(node);
        Ok(())
    }

    /// Absolute path of the current directory.
    pub fn cwd_path(&self) -> String {
        absolute_path(&self.cwd())
    }

    /// getcwd(2). Writes the NUL-terminated path into `buf` and returns the
    /// number of bytes written, terminator included.
    pub fn getcwd(&self, buf: &mut [u8]) -> FsResult<usize> {
        if buf.is_empty() {
            fs_bail!("getcwd", FsError::Invalid, "the size argument is zero");
        }
        let path = self.cwd_path();
        let len = path.len();
        if len + 1 > buf.len() {
            fs_bail!("getcwd", FsError::Range, "the buffer is smaller than the path plus its terminator");
        }
        buf[..len].copy_from_slice(path.as_bytes());
        buf[len] = 0;
        Ok(len + 1)
    }

    /// Register a file whose bytes live at the remote origin. Missing parent
    /// directories are created. The content is fetched on the first open
    /// that can read.
    pub fn declare_remote(&self, path: &str, mode: u32) -> FsResult<()> {
        debug!("declare_remote(pathname=\"{}\", mode={:#o})", path, mode);
        self.check_path("declare_remote", path)?;
        if self.lookup(path).is_some() {
            fs_bail!("declare_remote", FsError::Exists, "pathname already exists");
        }
        let perm = Permission::from_bits_truncate(mode);
        match self.create_at(path, InodeKind::File, perm, perm, None, true) {
            Ok(_) => Ok(()),
            Err(e) => fs_bail!("declare_remote", e, "the node could not be created"),
        }
    }

    /// Up to `max_entries` entries of the directory open at `fd`, starting at
    /// its cursor. The listing is `.`, `..` (the root is its own parent) and
    /// then the children in link order. An empty result means the end.
    pub fn read_dir(&self, fd: i32, max_entries: usize) -> FsResult<Vec<Dirent>> {
        debug!("read_dir(fd={}, max_entries={})", fd, max_entries);
        let file = match self.descriptor(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("getdents64", e, "invalid file descriptor fd"),
        };
        if max_entries == 0 {
            fs_bail!("getdents64", FsError::Invalid, "result buffer is too small");
        }
        let dir = file.node();
        if !dir.is_dir() {
            fs_bail!("getdents64", FsError::NotDirectory, "file descriptor does not refer to a directory");
        }
        let dotdot = dir.parent().unwrap_or_else(|| dir.clone());

        Ok(file.with_offset(|cursor| {
            let mut out = Vec::new();
            let entries = [(dir.clone(), "."), (dotdot, "..")];
            let children = dir.children();
            let listing = entries
                .iter()
                .map(|(node, name)| (node, *name))
                .chain(children.iter().map(|c| (c, c.name())));
            for (index, (node, name)) in listing.enumerate() {
                if out.len() == max_entries {
                    break;
                }
                let pos = (index * DIRENT_RECORD_SIZE) as i64;
                if *cursor <= pos {
                    out.push(Dirent::new(node, name, index));
                    *cursor += DIRENT_RECORD_SIZE as i64;
                }
            }
            out
        }))
    }

    /// getdents64(2). Fills `buf` with whole [`DIRENT_RECORD_SIZE`] records
    /// and returns the bytes written.
    pub fn getdents(&self, fd: i32, buf: &mut [u8]) -> FsResult<usize> {
        let entries = self.read_dir(fd, buf.len() / DIRENT_RECORD_SIZE)?;
        for (entry, record) in entries.iter().zip(buf.chunks_exact_mut(DIRENT_RECORD_SIZE)) {
            entry.encode(record);
        }
        Ok(entries.len() * DIRENT_RECORD_SIZE)
    }
}
