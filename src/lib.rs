#![cfg_attr(not(any(test, feature = "std")), no_std)]
extern crate alloc;

mod error;

pub mod common;
pub mod config;
pub mod dir;
pub mod dump;
pub mod fd;
pub mod fetch;
pub mod fs;
pub mod inode;
pub mod path;
pub mod stdio;


use alloc::sync::Arc;

use log::info;
use spin::Once;

pub use common::{AccessMode, InodeKind, OpenFlags, Permission, Stat, TimeSpec};
pub use config::FsConfig;
pub use dir::Dirent;
pub use error::{syscall_ret, FsError, FsResult};
pub use fetch::{ContentProvider, FetchHandle, FetchStatus, MemoryProvider, NoRemote};
pub use fs::Filesystem;
pub use stdio::{LogCrateSink, LogSink};

/// Longest pathname any operation accepts, in bytes.
pub const MAX_PATHNAME_LENGTH: usize = 2000;

/// Longest single path component, in bytes.
pub const NAME_MAX: usize = 255;

/// Ancestors walked when rebuilding an absolute path.
pub const MAX_DIRECTORY_DEPTH: usize = 512;

/// Size of one getdents64 record: 19 header bytes and a 256-byte name,
/// padded to 8.
pub const DIRENT_RECORD_SIZE: usize = 280;

static FILESYSTEM: Once<Arc<Filesystem>> = Once::new();

/// Install the process-wide filesystem. Only the first call has an effect;
/// the instance actually in use is returned.
pub fn install(fs: Filesystem) -> Arc<Filesystem> {
    FILESYSTEM
        .call_once(|| {
            info!("fetchfs installed");
            Arc::new(fs)
        })
        .clone()
}

/// The process-wide filesystem, created on first use with the default
/// configuration and no remote origin if nothing was installed.
pub fn global() -> Arc<Filesystem> {
    FILESYSTEM.call_once(|| Arc::new(Filesystem::local())).clone()
}
