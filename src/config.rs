use alloc::sync::Arc;
use core::time::Duration;

use crate::common::{Clock, Permission};

/// Largest offset seek accepts: the range of a 32-bit `off_t`.
pub const DEFAULT_MAX_OFFSET: i64 = 0x7FFF_FFFF;

/// Knobs of a [`Filesystem`](crate::Filesystem) instance.
#[derive(Clone)]
pub struct FsConfig {
    /// Owner stamped on every inode the engine creates.
    pub uid: u32,
    pub gid: u32,
    /// Permission bits of the root directory.
    pub root_perm: Permission,
    /// Bound on every wait for remote content. `None` blocks until the
    /// provider answers.
    pub fetch_timeout: Option<Duration>,
    /// Seeks past this offset fail with EOVERFLOW.
    pub max_offset: i64,
    pub clock: Arc<dyn Clock>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            root_perm: Permission::from_bits_truncate(0o777),
            fetch_timeout: None,
            max_offset: DEFAULT_MAX_OFFSET,
            clock: default_clock(),
        }
    }
}

impl FsConfig {
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

#[cfg(feature = "std")]
fn default_clock() -> Arc<dyn Clock> {
    Arc::new(crate::common::SystemClock)
}

#[cfg(not(feature = "std"))]
fn default_clock() -> Arc<dyn Clock> {
    Arc::new(crate::common::FixedClock::default())
}
