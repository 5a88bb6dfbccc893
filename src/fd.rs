//! Open file descriptions and the descriptor table.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{
    common::{AccessMode, OpenFlags},
    error::{FsError, FsResult},
    inode::Inode,
};

/// Lowest descriptor handed out by open; 0, 1 and 2 are the standard streams.
pub const FIRST_FD: i32 = 3;

/// An open file handle. The offset is private to this handle.
pub struct OpenFile {
    node: Arc<Inode>,
    offset: Mutex<i64>,
    access: AccessMode,
    flags: OpenFlags,
}

impl OpenFile {
    pub fn new(node: Arc<Inode>, offset: i64, access: AccessMode, flags: OpenFlags) -> Self {
        Self {
            node,
            offset: Mutex::new(offset),
            access,
            flags,
        }
    }

    pub fn node(&self) -> &Arc<Inode> {
        &self.node
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn offset(&self) -> i64 {
        *self.offset.lock()
    }

    pub fn set_offset(&self, offset: i64) {
        *self.offset.lock() = offset;
    }

    /// Run `f` with the offset locked, so a read or write and the cursor
    /// update it causes happen as one step.
    pub fn with_offset<R>(&self, f: impl FnOnce(&mut i64) -> R) -> R {
        f(&mut self.offset.lock())
    }

    /// A second handle on the same inode with a copy of the current offset.
    pub fn duplicate(&self) -> Self {
        Self::new(self.node.clone(), self.offset(), self.access, self.flags)
    }
}

#[derive(Default)]
pub struct FdTable {
    slots: Mutex<Vec<Option<Arc<OpenFile>>>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `file` under the lowest free descriptor.
    pub fn insert(&self, file: OpenFile) -> i32 {
        let file = Arc::new(file);
        let mut slots = self.slots.lock();
        let index = match slots.iter().position(Option::is_none) {
            Some(i) => {
                slots[i] = Some(file);
                i
            }
            None => {
                slots.push(Some(file));
                slots.len() - 1
            }
        };
        index as i32 + FIRST_FD
    }

    pub fn get(&self, fd: i32) -> FsResult<Arc<OpenFile>> {
        let index = Self::index(fd)?;
        self.slots
            .lock()
            .get(index)
            .and_then(Clone::clone)
            .ok_or(FsError::BadDescriptor)
    }

    pub fn remove(&self, fd: i32) -> FsResult<Arc<OpenFile>> {
        let index = Self::index(fd)?;
        self.slots
            .lock()
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(FsError::BadDescriptor)
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    fn index(fd: i32) -> FsResult<usize> {
        match fd.checked_sub(FIRST_FD) {
            Some(i) if i >= 0 => Ok(i as usize),
            _ => Err(FsError::BadDescriptor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FixedClock, InodeKind, Permission};
    use crate::inode::InodeAllocator;

    fn open_file() -> OpenFile {
        let alloc = InodeAllocator::new(0, 0, Arc::new(FixedClock::default()));
        let node = alloc
            .create("f", InodeKind::File, Permission::from_bits_truncate(0o644))
            .unwrap();
        OpenFile::new(node, 0, AccessMode::ReadWrite, OpenFlags::O_APPEND)
    }

    #[test]
    fn reuses_lowest_free_descriptor() {
        let table = FdTable::new();
        assert_eq!(table.insert(open_file()), 3);
        assert_eq!(table.insert(open_file()), 4);
        assert_eq!(table.insert(open_file()), 5);
        table.remove(4).unwrap();
        assert_eq!(table.insert(open_file()), 4);
        assert_eq!(table.open_count(), 3);
    }

    #[test]
    fn unknown_descriptors_are_bad() {
        let table = FdTable::new();
        assert!(matches!(table.get(1), Err(FsError::BadDescriptor)));
        assert!(matches!(table.get(-7), Err(FsError::BadDescriptor)));
        assert!(matches!(table.get(3), Err(FsError::BadDescriptor)));
        let fd = table.insert(open_file());
        table.remove(fd).unwrap();
        assert!(matches!(table.remove(fd), Err(FsError::BadDescriptor)));
    }

    #[test]
    fn duplicate_has_independent_offset() {
        let file = open_file();
        file.set_offset(10);
        let dup = file.duplicate();
        dup.set_offset(2);
        assert_eq!(file.offset(), 10);
        assert!(Arc::ptr_eq(file.node(), dup.node()));
        assert_eq!(dup.access(), AccessMode::ReadWrite);
        assert_eq!(dup.flags(), OpenFlags::O_APPEND);
    }
}
