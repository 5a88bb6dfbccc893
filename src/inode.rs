//! In-memory inodes.
//!
//! A directory owns its children through an ordered list behind a
//! reader/writer lock; every child keeps a weak back reference to its parent.
//! Linking and unlinking both take the parent's write lock, lookups and
//! listings take the read lock. Lock order is always parent list before child
//! state.

use alloc::{
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};
use core::{
    cmp::{max, min},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use log::{debug, info, warn};
use spin::{Mutex, RwLock};

use crate::{
    common::{Clock, InodeKind, Permission, Stat, TimeSpec},
    error::{FsError, FsResult},
    fetch::FetchHandle,
    NAME_MAX,
};

/// Mutable metadata of an inode.
#[derive(Debug, Clone, Copy)]
pub struct InodeAttr {
    pub uid: u32,
    pub gid: u32,
    pub perm: Permission,
    pub ctime: TimeSpec,
    pub mtime: TimeSpec,
    pub atime: TimeSpec,
}

/// File bytes. `None` until the first write, a truncating open, or a finished
/// remote fetch.
#[derive(Debug, Default)]
struct Content {
    data: Option<Vec<u8>>,
}

pub struct Inode {
    ino: u64,
    name: String,
    kind: InodeKind,
    attr: Mutex<InodeAttr>,
    parent: Mutex<Weak<Inode>>,
    children: RwLock<Vec<Arc<Inode>>>,
    content: RwLock<Content>,
    fetch: Mutex<Option<Arc<dyn FetchHandle>>>,
}

/// Hands out inode numbers and stamps new inodes with owner and time.
pub struct InodeAllocator {
    next_ino: AtomicU64,
    uid: u32,
    gid: u32,
    clock: Arc<dyn Clock>,
}

impl InodeAllocator {
    pub fn new(uid: u32, gid: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            next_ino: AtomicU64::new(1),
            uid,
            gid,
            clock,
        }
    }

    pub fn now(&self) -> TimeSpec {
        self.clock.now()
    }

    /// Build an unlinked inode. Files start with no content.
    pub fn create(&self, name: &str, kind: InodeKind, perm: Permission) -> FsResult<Arc<Inode>> {
        if name.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        Ok(self.build(name, kind, perm))
    }

    /// The root directory: nameless and never linked.
    pub fn create_root(&self, perm: Permission) -> Arc<Inode> {
        self.build("", InodeKind::Directory, perm)
    }

    fn build(&self, name: &str, kind: InodeKind, perm: Permission) -> Arc<Inode> {
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        let now = self.now();
        debug!("create_inode: #{} {} \"{}\"", ino, kind, name);
        Arc::new(Inode {
            ino,
            name: name.to_string(),
            kind,
            attr: Mutex::new(InodeAttr {
                uid: self.uid,
                gid: self.gid,
                perm,
                ctime: now,
                mtime: now,
                atime: now,
            }),
            parent: Mutex::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            content: RwLock::new(Content::default()),
            fetch: Mutex::new(None),
        })
    }

    /// Build a file inode that already holds `data`.
    pub fn create_file_with(&self, name: &str, perm: Permission, data: Vec<u8>) -> FsResult<Arc<Inode>> {
        let node = self.create(name, InodeKind::File, perm)?;
        node.content.write().data = Some(data);
        Ok(node)
    }
}

impl Inode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn attr(&self) -> InodeAttr {
        *self.attr.lock()
    }

    pub fn perm(&self) -> Permission {
        self.attr.lock().perm
    }

    pub fn set_perm(&self, perm: Permission, now: TimeSpec) {
        let mut attr = self.attr.lock();
        attr.perm = perm;
        attr.ctime = now;
    }

    pub fn parent(&self) -> Option<Arc<Inode>> {
        self.parent.lock().upgrade()
    }

    pub fn is_linked(&self) -> bool {
        self.parent.lock().strong_count() > 0
    }

    /// Child with exactly this name.
    pub fn child(&self, name: &str) -> Option<Arc<Inode>> {
        self.children
            .read()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Children in link order.
    pub fn children(&self) -> Vec<Arc<Inode>> {
        self.children.read().clone()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    /// Publish `self` as the last child of `parent`.
    ///
    /// `self` must not be linked anywhere yet. A sibling with the same name
    /// makes the link fail with `Exists`.
    pub fn link(self: &Arc<Self>, parent: &Arc<Inode>) -> FsResult<()> {
        debug_assert!(!self.is_linked(), "link of an inode that already has a parent");
        if !parent.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut children = parent.children.write();
        if children.iter().any(|c| c.name == self.name) {
            return Err(FsError::Exists);
        }
        *self.parent.lock() = Arc::downgrade(parent);
        children.push(self.clone());
        debug!("link_inode: \"{}\" under \"{}\"", self.name, parent.name);
        Ok(())
    }

    /// Remove `self` from its parent's children. Unlinked inodes are left alone.
    pub fn unlink(self: &Arc<Self>) {
        let _ = self.unlink_checked(|_| Ok(()));
    }

    /// Like [`unlink`](Self::unlink) but only when `self` has no children,
    /// checked while the parent's list is locked so a concurrent link into
    /// `self` cannot slip in between.
    pub fn unlink_empty_dir(self: &Arc<Self>) -> FsResult<()> {
        self.unlink_checked(|node| match node.has_children() {
            true => Err(FsError::NotEmpty),
            false => Ok(()),
        })
    }

    fn unlink_checked(self: &Arc<Self>, check: impl FnOnce(&Inode) -> FsResult<()>) -> FsResult<()> {
        let Some(parent) = self.parent() else {
            return Ok(());
        };
        let mut children = parent.children.write();
        check(self)?;
        if let Some(pos) = children.iter().position(|c| Arc::ptr_eq(c, self)) {
            children.remove(pos);
        }
        *self.parent.lock() = Weak::new();
        debug!("unlink_inode: \"{}\" from \"{}\"", self.name, parent.name);
        Ok(())
    }

    /// True once the node holds bytes of its own (written, truncated or fetched).
    pub fn has_content(&self) -> bool {
        self.content.read().data.is_some()
    }

    /// Logical length of the cached content.
    pub fn size(&self) -> usize {
        self.content.read().data.as_ref().map_or(0, Vec::len)
    }

    /// Allocated length of the content buffer.
    pub fn capacity(&self) -> usize {
        self.content.read().data.as_ref().map_or(0, Vec::capacity)
    }

    /// End of file for seeking: the bytes received so far while a fetch is
    /// pending, the cached size otherwise.
    pub fn end_offset(&self) -> usize {
        match self.fetch.lock().as_ref() {
            Some(handle) => handle.received(),
            None => self.size(),
        }
    }

    pub fn stat(&self) -> Stat {
        let attr = self.attr();
        Stat {
            ino: self.ino,
            kind: self.kind,
            perm: attr.perm.bits(),
            uid: attr.uid,
            gid: attr.gid,
            size: self.size() as u64,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
        }
    }

    /// Copy bytes starting at `offset` into `bufs` in order. Returns the total
    /// copied, 0 at or past end of file.
    pub fn read_at(&self, offset: usize, bufs: &mut [&mut [u8]], now: TimeSpec) -> usize {
        let content = self.content.read();
        let data = content.data.as_deref().unwrap_or(&[]);
        let mut pos = offset;
        for buf in bufs.iter_mut() {
            if pos >= data.len() {
                break;
            }
            let n = min(data.len() - pos, buf.len());
            buf[..n].copy_from_slice(&data[pos..pos + n]);
            pos += n;
        }
        drop(content);
        self.attr.lock().atime = now;
        pos - offset
    }

    /// Write `bufs` back to back starting at `offset`, growing the buffer
    /// geometrically when it is too small. A gap between the old end and
    /// `offset` reads back as zeros.
    pub fn write_at(&self, offset: usize, bufs: &[&[u8]], now: TimeSpec) -> FsResult<usize> {
        let total = bufs.iter().map(|b| b.len()).sum::<usize>();
        let end = offset.checked_add(total).ok_or(FsError::Overflow)?;

        let mut content = self.content.write();
        let data = content.data.get_or_insert_with(Vec::new);
        if end > data.capacity() {
            let grown = max(end, data.capacity() + data.capacity() / 4);
            data.try_reserve_exact(grown - data.len())
                .map_err(|_| FsError::NoMemory)?;
        }
        if data.len() < end {
            data.resize(end, 0);
        }
        let mut pos = offset;
        for buf in bufs {
            data[pos..pos + buf.len()].copy_from_slice(buf);
            pos += buf.len();
        }
        drop(content);

        let mut attr = self.attr.lock();
        attr.mtime = now;
        attr.ctime = now;
        Ok(total)
    }

    /// Drop any pending fetch and make the content an empty buffer.
    pub fn truncate(&self, now: TimeSpec) {
        let mut slot = self.fetch.lock();
        if let Some(handle) = slot.take() {
            info!("truncate \"{}\": cancelling pending fetch", self.name);
            handle.cancel();
        }
        self.content.write().data = Some(Vec::new());
        drop(slot);
        let mut attr = self.attr.lock();
        attr.mtime = now;
        attr.ctime = now;
    }

    pub fn has_pending_fetch(&self) -> bool {
        self.fetch.lock().is_some()
    }

    /// Attach a fetch started by `start` unless the node already has content
    /// or a fetch of its own. Returns false when nothing was attached.
    pub fn attach_fetch(&self, start: impl FnOnce() -> Arc<dyn FetchHandle>) -> bool {
        let mut slot = self.fetch.lock();
        if slot.is_some() || self.has_content() {
            return false;
        }
        *slot = Some(start());
        true
    }

    /// Wait for the pending fetch, if any, and move its bytes into the node.
    ///
    /// Any number of callers may wait on the same fetch; the first to return
    /// from the wait installs the content and releases the handle. A fetch that
    /// fails, carries no bytes, or outlives `timeout` is cancelled and reported
    /// as `NotFound`.
    pub fn settle_fetch(&self, timeout: Option<Duration>) -> FsResult<()> {
        let Some(handle) = self.fetch.lock().clone() else {
            return Ok(());
        };
        let status = handle.wait(timeout);

        let mut slot = self.fetch.lock();
        match slot.as_ref() {
            Some(current) if same_handle(current, &handle) => {}
            // Someone else settled or truncated in the meantime.
            _ => return Ok(()),
        }
        slot.take();

        match status {
            Some(status) if status.has_content() => {
                let data = handle.take_data();
                info!("fetch for \"{}\" finished: {} bytes", self.name, data.len());
                self.content.write().data = Some(data);
                handle.cancel();
                Ok(())
            }
            Some(status) => {
                warn!(
                    "fetch for \"{}\" failed: status {}, {} bytes",
                    self.name, status.status, status.len
                );
                handle.cancel();
                Err(FsError::NotFound)
            }
            None => {
                warn!("fetch for \"{}\" timed out", self.name);
                handle.cancel();
                Err(FsError::NotFound)
            }
        }
    }
}

fn same_handle(a: &Arc<dyn FetchHandle>, b: &Arc<dyn FetchHandle>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FixedClock;
    use crate::fetch::{CompletedFetch, FETCH_STATUS_NOT_FOUND, FETCH_STATUS_OK};

    fn alloc() -> InodeAllocator {
        InodeAllocator::new(0, 0, Arc::new(FixedClock(TimeSpec::new(7, 0))))
    }

    fn perm(bits: u32) -> Permission {
        Permission::from_bits_truncate(bits)
    }

    #[test]
    fn link_rejects_duplicate_names() {
        let a = alloc();
        let dir = a.create("", InodeKind::Directory, perm(0o777)).unwrap();
        let x = a.create("x", InodeKind::File, perm(0o644)).unwrap();
        let x2 = a.create("x", InodeKind::Directory, perm(0o755)).unwrap();
        x.link(&dir).unwrap();
        assert_eq!(x2.link(&dir), Err(FsError::Exists));
        assert!(!x2.is_linked());
        assert_eq!(dir.children().len(), 1);
    }

    #[test]
    fn unlink_splices_from_the_middle() {
        let a = alloc();
        let dir = a.create("", InodeKind::Directory, perm(0o777)).unwrap();
        let nodes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| a.create(n, InodeKind::File, perm(0o644)).unwrap())
            .collect();
        for n in &nodes {
            n.link(&dir).unwrap();
        }
        nodes[1].unlink();
        let names: Vec<_> = dir.children().iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, ["a", "c"]);
        assert!(nodes[1].parent().is_none());
        // relinking after unlink is allowed
        nodes[1].link(&dir).unwrap();
        assert!(dir.child("b").is_some());
    }

    #[test]
    fn unlink_empty_dir_refuses_populated() {
        let a = alloc();
        let root = a.create("", InodeKind::Directory, perm(0o777)).unwrap();
        let d = a.create("d", InodeKind::Directory, perm(0o777)).unwrap();
        let f = a.create("f", InodeKind::File, perm(0o644)).unwrap();
        d.link(&root).unwrap();
        f.link(&d).unwrap();
        assert_eq!(d.unlink_empty_dir(), Err(FsError::NotEmpty));
        f.unlink();
        d.unlink_empty_dir().unwrap();
        assert!(!root.has_children());
    }

    #[test]
    fn write_grows_geometrically_and_zero_fills() {
        let a = alloc();
        let f = a.create("f", InodeKind::File, perm(0o644)).unwrap();
        let now = TimeSpec::new(9, 0);
        f.write_at(0, &[&[1u8; 100]], now).unwrap();
        assert_eq!(f.size(), 100);
        assert!(f.capacity() >= 100);

        f.write_at(104, &[b"xy", b"z"], now).unwrap();
        assert_eq!(f.size(), 107);
        assert!(f.capacity() >= 125);

        let mut out = [0xffu8; 8];
        let n = f.read_at(99, &mut [&mut out[..]], now);
        assert_eq!(n, 8);
        assert_eq!(out, [1, 0, 0, 0, 0, b'x', b'y', b'z']);
        assert_eq!(f.attr().mtime, now);
    }

    #[test]
    fn overwrite_inside_keeps_size() {
        let a = alloc();
        let f = a.create_file_with("f", perm(0o644), b"hello world".to_vec()).unwrap();
        f.write_at(0, &[b"J"], TimeSpec::default()).unwrap();
        assert_eq!(f.size(), 11);
        let mut out = [0u8; 16];
        let (lo, hi) = out.split_at_mut(5);
        let n = f.read_at(0, &mut [lo, hi], TimeSpec::default());
        assert_eq!(&out[..n], b"Jello world");
    }

    #[test]
    fn settle_installs_fetched_bytes() {
        let a = alloc();
        let f = a.create("f", InodeKind::File, perm(0o644)).unwrap();
        assert!(f.attach_fetch(|| Arc::new(CompletedFetch::new(FETCH_STATUS_OK, b"remote".to_vec()))));
        assert!(f.has_pending_fetch());
        assert_eq!(f.end_offset(), 6);
        f.settle_fetch(None).unwrap();
        assert!(!f.has_pending_fetch());
        assert_eq!(f.size(), 6);
        // content present: nothing else gets attached
        assert!(!f.attach_fetch(|| -> Arc<dyn FetchHandle> { unreachable!() }));
    }

    #[test]
    fn failed_fetch_leaves_node_empty() {
        let a = alloc();
        let f = a.create("f", InodeKind::File, perm(0o644)).unwrap();
        f.attach_fetch(|| Arc::new(CompletedFetch::new(FETCH_STATUS_NOT_FOUND, Vec::new())));
        assert_eq!(f.settle_fetch(None), Err(FsError::NotFound));
        assert!(!f.has_content());
        assert!(!f.has_pending_fetch());
    }

    #[test]
    fn truncate_cancels_pending_fetch() {
        let a = alloc();
        let f = a.create("f", InodeKind::File, perm(0o644)).unwrap();
        f.attach_fetch(|| Arc::new(CompletedFetch::new(FETCH_STATUS_OK, b"remote".to_vec())));
        f.truncate(TimeSpec::default());
        assert!(!f.has_pending_fetch());
        assert!(f.has_content());
        assert_eq!(f.size(), 0);
    }

    #[test]
    fn long_names_are_rejected() {
        let a = alloc();
        let name = "n".repeat(NAME_MAX + 1);
        assert!(matches!(
            a.create(&name, InodeKind::File, perm(0o644)),
            Err(FsError::NameTooLong)
        ));
    }
}
