//! The filesystem context and the descriptor syscalls: open, read, write,
//! seek, close, dup, fsync and fstat.

use alloc::{string::String, sync::Arc, vec::Vec};

use log::{debug, info};
use spin::RwLock;

use crate::{
    common::{AccessMode, InodeKind, OpenFlags, Permission, Stat, TimeSpec, Whence},
    config::FsConfig,
    error::{FsError, FsResult},
    fd::{FdTable, OpenFile},
    fetch::{ContentProvider, NoRemote},
    fs_bail,
    inode::{Inode, InodeAllocator},
    path::{absolute_path, ensure_directory_chain, normalize, resolve, split_last},
    stdio::{LineBuffer, LogCrateSink, LogSink, StdStream},
    MAX_PATHNAME_LENGTH,
};

/// Mode of a file materialized by a plain (non-creating) open.
pub const FETCHED_FILE_PERM: Permission = Permission::from_bits_truncate(0o444);
/// Mode of the directories made above such a file.
pub const FETCHED_DIR_PERM: Permission = Permission::from_bits_truncate(0o755);

/// One filesystem instance: the tree, the current directory, the descriptor
/// table and the collaborators it talks to.
pub struct Filesystem {
    config: FsConfig,
    alloc: InodeAllocator,
    root: Arc<Inode>,
    cwd: RwLock<Arc<Inode>>,
    fds: FdTable,
    provider: Arc<dyn ContentProvider>,
    sink: Arc<dyn LogSink>,
    stdout: LineBuffer,
    stderr: LineBuffer,
}

impl Filesystem {
    pub fn new(config: FsConfig, provider: Arc<dyn ContentProvider>, sink: Arc<dyn LogSink>) -> Self {
        let alloc = InodeAllocator::new(config.uid, config.gid, config.clock.clone());
        let root = alloc.create_root(config.root_perm);
        info!("filesystem created, root perm {:o}", config.root_perm.bits());
        Self {
            config,
            alloc,
            cwd: RwLock::new(root.clone()),
            root,
            fds: FdTable::new(),
            provider,
            sink,
            stdout: LineBuffer::new(),
            stderr: LineBuffer::new(),
        }
    }

    /// Default configuration, stdout/stderr forwarded to `log`.
    pub fn with_provider(provider: Arc<dyn ContentProvider>) -> Self {
        Self::new(FsConfig::default(), provider, Arc::new(LogCrateSink))
    }

    /// A filesystem with no remote origin: only created files exist.
    pub fn local() -> Self {
        Self::with_provider(Arc::new(NoRemote))
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<Inode> {
        &self.root
    }

    pub fn cwd(&self) -> Arc<Inode> {
        self.cwd.read().clone()
    }

    pub(crate) fn set_cwd(&self, node: Arc<Inode>) {
        *self.cwd.write() = node;
    }

    pub(crate) fn now(&self) -> TimeSpec {
        self.alloc.now()
    }

    pub(crate) fn allocator(&self) -> &InodeAllocator {
        &self.alloc
    }

    pub fn open_descriptors(&self) -> usize {
        self.fds.open_count()
    }

    /// Directory a path is resolved from: the root for absolute paths, the
    /// current directory otherwise.
    pub(crate) fn start_of(&self, path: &str) -> Arc<Inode> {
        if path.starts_with('/') {
            self.root.clone()
        } else {
            self.cwd()
        }
    }

    pub(crate) fn check_path(&self, op: &str, path: &str) -> FsResult<()> {
        if path.len() > MAX_PATHNAME_LENGTH {
            fs_bail!(op, FsError::NameTooLong, "pathname was too long");
        }
        if path.is_empty() {
            fs_bail!(op, FsError::NotFound, "pathname is empty");
        }
        Ok(())
    }

    /// The node `path` names, if any.
    pub fn lookup(&self, path: &str) -> Option<Arc<Inode>> {
        resolve(&self.start_of(path), path)
    }

    /// Absolute, normalized spelling of `path`; the name remote objects go by.
    pub fn absolute(&self, path: &str) -> String {
        let base = if path.starts_with('/') {
            String::from("/")
        } else {
            absolute_path(&self.cwd())
        };
        normalize(&base, path)
    }

    /// Create and link the node `path` names, making missing parent
    /// directories with `dir_perm` on the way. `.` and `..` are folded first.
    /// If another caller linked the same name first, their node is returned
    /// instead, unless `exclusive` is set, which gives `EEXIST`.
    pub(crate) fn create_at(
        &self,
        path: &str,
        kind: InodeKind,
        perm: Permission,
        dir_perm: Permission,
        data: Option<Vec<u8>>,
        exclusive: bool,
    ) -> FsResult<Arc<Inode>> {
        let path = self.absolute(path);
        let dir = ensure_directory_chain(&self.alloc, &self.root, &path, dir_perm)?;
        let (_, name) = split_last(&path);
        if matches!(name, "" | "." | "..") {
            return Err(FsError::Exists);
        }
        let node = match data {
            Some(data) => self.alloc.create_file_with(name, perm, data)?,
            None => self.alloc.create(name, kind, perm)?,
        };
        match node.link(&dir) {
            Ok(()) => Ok(node),
            Err(FsError::Exists) if !exclusive => dir.child(name).ok_or(FsError::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Fetch `path` from the provider for a node that does not exist yet,
    /// blocking until the transfer resolves.
    fn fetch_new(&self, path: &str) -> FsResult<Vec<u8>> {
        let remote = self.absolute(path);
        info!("fetching \"{}\"", remote);
        let handle = self.provider.fetch(&remote);
        let status = handle.wait(self.config.fetch_timeout);
        let data = match status {
            Some(status) if status.has_content() => Ok(handle.take_data()),
            _ => Err(FsError::NotFound),
        };
        handle.cancel();
        data
    }

    /// Make sure an existing file node has content, fetching it if needed.
    fn load(&self, node: &Arc<Inode>) -> FsResult<()> {
        if !node.has_content() {
            let remote = absolute_path(node);
            if node.attach_fetch(|| self.provider.fetch(&remote)) {
                info!("fetching \"{}\"", remote);
            }
        }
        node.settle_fetch(self.config.fetch_timeout)
    }

    /// open(2). Returns the new descriptor.
    pub fn open(&self, path: &str, flags: u32, mode: u32) -> FsResult<i32> {
        debug!("open(pathname=\"{}\", flags={:#x}, mode={:#o})", path, flags, mode);
        let (access, flags) = match AccessMode::split(flags) {
            Ok(split) => split,
            Err(e) => fs_bail!("open", e, "access mode is invalid"),
        };

        if flags.contains(OpenFlags::O_ASYNC) {
            fs_bail!("open", FsError::NotSupported, "O_ASYNC is not supported");
        }
        if flags.contains(OpenFlags::O_DIRECT) {
            fs_bail!("open", FsError::NotSupported, "O_DIRECT is not supported");
        }
        if flags.contains(OpenFlags::O_DSYNC) {
            fs_bail!("open", FsError::NotSupported, "O_DSYNC is not supported");
        }
        if flags.contains(OpenFlags::O_EXCL) && !flags.contains(OpenFlags::O_CREAT) {
            fs_bail!("open", FsError::Invalid, "O_EXCL needs to be paired with O_CREAT");
        }
        if flags.contains(OpenFlags::O_NONBLOCK) {
            fs_bail!("open", FsError::NotSupported, "O_NONBLOCK and O_NDELAY are not supported");
        }
        if flags.contains(OpenFlags::O_PATH) {
            fs_bail!("open", FsError::NotSupported, "O_PATH is not supported");
        }
        if flags.contains(OpenFlags::O_SYNC) {
            fs_bail!("open", FsError::NotSupported, "O_SYNC is not supported");
        }
        if flags.contains(OpenFlags::O_TMPFILE) {
            if !access.can_write() {
                fs_bail!("open", FsError::Invalid, "O_TMPFILE needs O_WRONLY or O_RDWR");
            }
            fs_bail!("open", FsError::NotSupported, "O_TMPFILE is not supported");
        }
        self.check_path("open", path)?;

        let perm = Permission::from_bits_truncate(mode);
        let existing = self.lookup(path);
        if let Some(node) = &existing {
            if flags.contains(OpenFlags::O_DIRECTORY) && !node.is_dir() {
                fs_bail!("open", FsError::NotDirectory, "O_DIRECTORY on a non-directory");
            }
            if !node.perm().readable() {
                fs_bail!("open", FsError::PermissionDenied, "access to the file is not allowed");
            }
            if flags.contains(OpenFlags::O_CREAT | OpenFlags::O_EXCL) {
                fs_bail!("open", FsError::Exists, "pathname exists and O_CREAT|O_EXCL was used");
            }
            if node.is_dir() && access.can_write() {
                fs_bail!("open", FsError::IsDirectory, "directories cannot be opened for writing");
            }
        }

        let kind = if flags.contains(OpenFlags::O_DIRECTORY) {
            InodeKind::Directory
        } else {
            InodeKind::File
        };
        let wants_content = access.can_read() && !flags.contains(OpenFlags::O_DIRECTORY);

        let node = if flags.intersects(OpenFlags::O_CREAT | OpenFlags::O_TRUNC | OpenFlags::O_EXCL) {
            match existing {
                Some(node) => {
                    if !node.is_dir() {
                        node.truncate(self.now());
                    }
                    node
                }
                None => {
                    let data = (kind == InodeKind::File).then(Vec::new);
                    let exclusive = flags.contains(OpenFlags::O_EXCL);
                    match self.create_at(path, kind, perm, perm, data, exclusive) {
                        Ok(node) => node,
                        Err(FsError::Exists) if exclusive => {
                            fs_bail!("open", FsError::Exists, "pathname exists and O_CREAT|O_EXCL was used")
                        }
                        Err(e) => fs_bail!("open", e, "the file could not be created"),
                    }
                }
            }
        } else {
            match existing {
                Some(node) => {
                    if !node.is_dir() && (wants_content || node.has_pending_fetch()) {
                        if let Err(e) = self.load(&node) {
                            fs_bail!("open", e, "the file content could not be fetched");
                        }
                    }
                    node
                }
                None if wants_content => {
                    let data = match self.fetch_new(path) {
                        Ok(data) => data,
                        Err(e) => fs_bail!("open", e, "O_CREAT is not set and the file was not found remotely"),
                    };
                    // The open's mode is meaningless without O_CREAT, so fetched
                    // files and the directories above them get fixed modes.
                    self.create_at(path, InodeKind::File, FETCHED_FILE_PERM, FETCHED_DIR_PERM, Some(data), false)?
                }
                None => fs_bail!("open", FsError::NotFound, "O_CREAT is not set and the named file does not exist"),
            }
        };

        let offset = if flags.contains(OpenFlags::O_APPEND) && node.has_content() {
            node.end_offset() as i64
        } else {
            0
        };
        let fd = self.fds.insert(OpenFile::new(node, offset, access, flags));
        debug!("open(\"{}\") = {}", path, fd);
        Ok(fd)
    }

    /// close(2). Waits for any fetch still attached to the inode and releases
    /// it; the inode and its cached bytes stay.
    pub fn close(&self, fd: i32) -> FsResult<()> {
        debug!("close(fd={})", fd);
        let file = match self.fds.remove(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("close", e, "fd isn't a valid open file descriptor"),
        };
        if file.node().has_pending_fetch() {
            let _ = file.node().settle_fetch(self.config.fetch_timeout);
        }
        Ok(())
    }

    /// readv(2).
    pub fn readv(&self, fd: i32, bufs: &mut [&mut [u8]]) -> FsResult<usize> {
        debug!("readv(fd={}, iovcnt={})", fd, bufs.len());
        let file = match self.fds.get(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("readv", e, "fd isn't a valid open file descriptor"),
        };
        let node = file.node();
        if node.is_dir() {
            fs_bail!("readv", FsError::IsDirectory, "fd refers to a directory");
        }
        if !file.access().can_read() {
            fs_bail!("readv", FsError::BadDescriptor, "fd is not open for reading");
        }
        total_len(bufs.iter().map(|b| b.len()))?;
        if let Err(e) = node.settle_fetch(self.config.fetch_timeout) {
            fs_bail!("readv", e, "the file content could not be fetched");
        }

        let now = self.now();
        let n = file.with_offset(|offset| {
            let n = node.read_at(*offset as usize, bufs, now);
            *offset += n as i64;
            n
        });
        Ok(n)
    }

    /// read(2).
    pub fn read(&self, fd: i32, buf: &mut [u8]) -> FsResult<usize> {
        self.readv(fd, &mut [buf])
    }

    /// writev(2). Descriptors 1 and 2 go to the log sink line by line.
    pub fn writev(&self, fd: i32, bufs: &[&[u8]]) -> FsResult<usize> {
        debug!("writev(fd={}, iovcnt={})", fd, bufs.len());
        let total = total_len(bufs.iter().map(|b| b.len()))?;

        if let Some(stream) = StdStream::from_fd(fd) {
            let line = self.line_buffer(stream);
            for buf in bufs {
                line.push(buf, stream, self.sink.as_ref());
            }
            return Ok(total);
        }

        let file = match self.fds.get(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("writev", e, "fd isn't a valid open file descriptor"),
        };
        let node = file.node();
        if node.is_dir() {
            fs_bail!("writev", FsError::IsDirectory, "fd refers to a directory");
        }
        if !file.access().can_write() {
            fs_bail!("writev", FsError::BadDescriptor, "fd is not open for writing");
        }
        // Fetched bytes must land before ours or they would replace them.
        if node.has_pending_fetch() {
            if let Err(e) = node.settle_fetch(self.config.fetch_timeout) {
                fs_bail!("writev", e, "the file content could not be fetched");
            }
        }

        let now = self.now();
        file.with_offset(|offset| -> FsResult<usize> {
            let start = usize::try_from(*offset).map_err(|_| FsError::Overflow)?;
            let n = node.write_at(start, bufs, now)?;
            *offset += n as i64;
            Ok(n)
        })
    }

    /// write(2).
    pub fn write(&self, fd: i32, buf: &[u8]) -> FsResult<usize> {
        self.writev(fd, &[buf])
    }

    /// lseek(2). Returns the new offset.
    pub fn seek(&self, fd: i32, offset: i64, whence: i32) -> FsResult<i64> {
        debug!("llseek(fd={}, offset={}, whence={})", fd, offset, whence);
        let file = match self.fds.get(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("llseek", e, "fd isn't a valid open file descriptor"),
        };
        let whence = match Whence::try_from(whence) {
            Ok(w) => w,
            Err(e) => fs_bail!("llseek", e, "whence is invalid"),
        };
        let node = file.node();
        file.with_offset(|cur| -> FsResult<i64> {
            let base = match whence {
                Whence::Set => 0,
                Whence::Cur => *cur,
                Whence::End => node.end_offset() as i64,
                Whence::Data | Whence::Hole => {
                    fs_bail!("llseek", FsError::Invalid, "sparse files (SEEK_DATA/SEEK_HOLE) are not supported")
                }
            };
            let new = match base.checked_add(offset) {
                Some(new) => new,
                None => fs_bail!("llseek", FsError::Overflow, "the resulting offset cannot be represented"),
            };
            if new < 0 {
                fs_bail!("llseek", FsError::Invalid, "the resulting file offset would be negative");
            }
            if new > self.config.max_offset {
                fs_bail!("llseek", FsError::Overflow, "the resulting file offset cannot be represented in an off_t");
            }
            *cur = new;
            Ok(new)
        })
    }

    /// dup(2): a new descriptor on the same inode with its own offset,
    /// starting where `fd`'s offset is now.
    pub fn dup(&self, fd: i32) -> FsResult<i32> {
        debug!("dup(fd={})", fd);
        let file = match self.fds.get(fd) {
            Ok(file) => file,
            Err(e) => fs_bail!("dup", e, "fd isn't a valid open file descriptor"),
        };
        Ok(self.fds.insert(file.duplicate()))
    }

    /// fsync(2). Content lives in memory, so this only validates the
    /// descriptor; on stdout/stderr it pushes out a pending partial line.
    pub fn fsync(&self, fd: i32) -> FsResult<()> {
        if let Some(stream) = StdStream::from_fd(fd) {
            self.line_buffer(stream).flush(stream, self.sink.as_ref());
            return Ok(());
        }
        match self.fds.get(fd) {
            Ok(_) => Ok(()),
            Err(e) => fs_bail!("fsync", e, "fd isn't a valid open file descriptor"),
        }
    }

    /// fstat(2).
    pub fn fstat(&self, fd: i32) -> FsResult<Stat> {
        match self.fds.get(fd) {
            Ok(file) => Ok(file.node().stat()),
            Err(e) => fs_bail!("fstat", e, "fd isn't a valid open file descriptor"),
        }
    }

    pub(crate) fn descriptor(&self, fd: i32) -> FsResult<Arc<OpenFile>> {
        self.fds.get(fd)
    }

    fn line_buffer(&self, stream: StdStream) -> &LineBuffer {
        match stream {
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }
}

/// Sum of buffer lengths, failing with `Invalid` if it would not fit a
/// signed size.
fn total_len(lens: impl Iterator<Item = usize>) -> FsResult<usize> {
    let mut total = 0usize;
    for len in lens {
        total = match total.checked_add(len) {
            Some(t) if t <= isize::MAX as usize => t,
            _ => return Err(FsError::Invalid),
        };
    }
    Ok(total)
}
