//! Plain data types shared by the tree, the descriptor table and the
//! directory operations.

use core::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::error::{FsError, FsResult};

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// Source of inode timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeSpec;
}

/// Clock stuck at a fixed instant. Used when no wall clock is available and in
/// tests that compare timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedClock(pub TimeSpec);

impl Clock for FixedClock {
    fn now(&self) -> TimeSpec {
        self.0
    }
}

#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> TimeSpec {
        match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => TimeSpec::new(d.as_secs() as i64, d.subsec_nanos() as i64),
            Err(_) => TimeSpec::default(),
        }
    }
}

bitflags! {
    /// rwx permission bits for owner, group and other.
    pub struct Permission: u32 {
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;

        const READ = Self::S_IRUSR.bits | Self::S_IRGRP.bits | Self::S_IROTH.bits;
        const WRITE = Self::S_IWUSR.bits | Self::S_IWGRP.bits | Self::S_IWOTH.bits;
        const EXEC = Self::S_IXUSR.bits | Self::S_IXGRP.bits | Self::S_IXOTH.bits;
    }
}

impl Permission {
    /// Any of the three read bits.
    pub fn readable(self) -> bool {
        self.intersects(Permission::READ)
    }

    /// Any of the three write bits.
    pub fn writable(self) -> bool {
        self.intersects(Permission::WRITE)
    }

    pub fn executable(self) -> bool {
        self.intersects(Permission::EXEC)
    }

    /// `ls -l` style rendering, e.g. `rwxr-x---`.
    pub fn symbolic(self) -> [u8; 9] {
        let bits = [
            (Permission::S_IRUSR, b'r'),
            (Permission::S_IWUSR, b'w'),
            (Permission::S_IXUSR, b'x'),
            (Permission::S_IRGRP, b'r'),
            (Permission::S_IWGRP, b'w'),
            (Permission::S_IXGRP, b'x'),
            (Permission::S_IROTH, b'r'),
            (Permission::S_IWOTH, b'w'),
            (Permission::S_IXOTH, b'x'),
        ];
        let mut out = [b'-'; 9];
        for (i, (bit, c)) in bits.iter().enumerate() {
            if self.contains(*bit) {
                out[i] = *c;
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InodeKind {
    File,
    Directory,
}

impl fmt::Display for InodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InodeKind::File => write!(f, "file"),
            InodeKind::Directory => write!(f, "directory"),
        }
    }
}

bitflags! {
    /// open(2) flags, Linux generic values. The access mode (low two bits) is
    /// kept apart in [`AccessMode`].
    pub struct OpenFlags: u32 {
        const O_CREAT = 0o100;
        const O_EXCL = 0o200;
        const O_NOCTTY = 0o400;
        const O_TRUNC = 0o1000;
        const O_APPEND = 0o2000;
        const O_NONBLOCK = 0o4000;
        const O_NDELAY = Self::O_NONBLOCK.bits;
        const O_DSYNC = 0o10000;
        const O_ASYNC = 0o20000;
        const O_DIRECT = 0o40000;
        const O_LARGEFILE = 0o100000;
        const O_DIRECTORY = 0o200000;
        const O_NOFOLLOW = 0o400000;
        const O_NOATIME = 0o1000000;
        const O_CLOEXEC = 0o2000000;
        const O_SYNC = 0o4010000;
        const O_PATH = 0o10000000;
        const O_TMPFILE = 0o20200000;
    }
}

pub const O_ACCMODE: u32 = 0o3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Split raw open flags into access mode and the remaining flag bits.
    /// Unknown flag bits are ignored, as are the low-bit value 3.
    pub fn split(raw: u32) -> FsResult<(AccessMode, OpenFlags)> {
        let mode = match raw & O_ACCMODE {
            0 => AccessMode::ReadOnly,
            1 => AccessMode::WriteOnly,
            2 => AccessMode::ReadWrite,
            _ => return Err(FsError::Invalid),
        };
        Ok((mode, OpenFlags::from_bits_truncate(raw & !O_ACCMODE)))
    }

    pub fn can_read(self) -> bool {
        self != AccessMode::WriteOnly
    }

    pub fn can_write(self) -> bool {
        self != AccessMode::ReadOnly
    }
}

bitflags! {
    /// access(2) mode bits. An empty set is `F_OK`.
    pub struct AccessCheck: u32 {
        const X_OK = 1;
        const W_OK = 2;
        const R_OK = 4;
    }
}

pub const F_OK: u32 = 0;

/// lseek(2) whence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
    Data,
    Hole,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            3 => Ok(Whence::Data),
            4 => Ok(Whence::Hole),
            _ => Err(FsError::Invalid),
        }
    }
}

/// Attributes reported by stat/fstat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
    pub ino: u64,
    pub kind: InodeKind,
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}
