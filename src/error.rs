//! Error type shared by every filesystem operation.
//!
//! Each variant maps to exactly one POSIX errno so callers built against the
//! numeric syscall contract see the same codes.

use onlyerror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("operation not permitted")]
    NotPermitted,
    #[error("no such file or directory")]
    NotFound,
    #[error("input/output error")]
    Io,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("out of memory")]
    NoMemory,
    #[error("permission denied")]
    PermissionDenied,
    #[error("bad address")]
    Fault,
    #[error("device or resource busy")]
    Busy,
    #[error("file exists")]
    Exists,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("invalid argument")]
    Invalid,
    #[error("result out of range")]
    Range,
    #[error("file name too long")]
    NameTooLong,
    #[error("directory not empty")]
    NotEmpty,
    #[error("value too large for defined data type")]
    Overflow,
    #[error("operation not supported")]
    NotSupported,
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// The positive errno value (Linux numbering).
    pub const fn errno(self) -> i32 {
        match self {
            FsError::NotPermitted => 1,
            FsError::NotFound => 2,
            FsError::Io => 5,
            FsError::BadDescriptor => 9,
            FsError::NoMemory => 12,
            FsError::PermissionDenied => 13,
            FsError::Fault => 14,
            FsError::Busy => 16,
            FsError::Exists => 17,
            FsError::NotDirectory => 20,
            FsError::IsDirectory => 21,
            FsError::Invalid => 22,
            FsError::Range => 34,
            FsError::NameTooLong => 36,
            FsError::NotEmpty => 39,
            FsError::Overflow => 75,
            // ENOTSUP and EOPNOTSUPP share a value on Linux.
            FsError::NotSupported => 95,
        }
    }

    /// errno symbol, used in log lines.
    pub const fn name(self) -> &'static str {
        match self {
            FsError::NotPermitted => "EPERM",
            FsError::NotFound => "ENOENT",
            FsError::Io => "EIO",
            FsError::BadDescriptor => "EBADF",
            FsError::NoMemory => "ENOMEM",
            FsError::PermissionDenied => "EACCES",
            FsError::Fault => "EFAULT",
            FsError::Busy => "EBUSY",
            FsError::Exists => "EEXIST",
            FsError::NotDirectory => "ENOTDIR",
            FsError::IsDirectory => "EISDIR",
            FsError::Invalid => "EINVAL",
            FsError::Range => "ERANGE",
            FsError::NameTooLong => "ENAMETOOLONG",
            FsError::NotEmpty => "ENOTEMPTY",
            FsError::Overflow => "EOVERFLOW",
            FsError::NotSupported => "ENOTSUP",
        }
    }
}

/// Flatten a result into the syscall return convention: the value on success,
/// `-errno` on failure. Values that do not fit the return register report
/// EOVERFLOW.
pub fn syscall_ret<T: TryInto<i64>>(res: FsResult<T>) -> i64 {
    match res {
        Ok(v) => v
            .try_into()
            .unwrap_or(-(FsError::Overflow.errno() as i64)),
        Err(e) => -(e.errno() as i64),
    }
}

/// Log the reason for a failure at debug level and return it from the current
/// function, mirroring how the syscall layer reports errno.
#[macro_export]
macro_rules! fs_bail {
    ($op:expr, $err:expr, $reason:expr) => {{
        let err: $crate::FsError = $err;
        log::debug!("{}() returned {}: {}", $op, err.name(), $reason);
        return Err(err);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_ret_negates_errno() {
        assert_eq!(syscall_ret::<i64>(Err(FsError::NotFound)), -2);
        assert_eq!(syscall_ret::<i64>(Err(FsError::NotEmpty)), -39);
        assert_eq!(syscall_ret(Ok(7u32)), 7);
        assert_eq!(syscall_ret(Ok(usize::MAX)), -75);
    }

    #[test]
    fn names_follow_errno() {
        assert_eq!(FsError::IsDirectory.name(), "EISDIR");
        assert_eq!(FsError::IsDirectory.errno(), 21);
        assert_eq!(FsError::Overflow.errno(), 75);
    }
}
