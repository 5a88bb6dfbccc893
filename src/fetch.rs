//! Boundary to the remote content provider.
//!
//! The engine only ever talks to a provider through these traits: start a
//! fetch for a path, wait on it (optionally bounded), take the bytes once it
//! completed, or cancel it. Everything asynchronous lives behind the handle.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::time::Duration;

use log::info;
use spin::{Mutex, RwLock};

/// HTTP-style success status reported by a finished fetch.
pub const FETCH_STATUS_OK: u16 = 200;
pub const FETCH_STATUS_NOT_FOUND: u16 = 404;

/// Outcome of a finished fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStatus {
    pub status: u16,
    /// Total bytes delivered.
    pub len: usize,
}

impl FetchStatus {
    /// Content is only usable when the transfer succeeded and carried bytes.
    pub fn has_content(&self) -> bool {
        self.status == FETCH_STATUS_OK && self.len > 0
    }
}

/// An in-flight or completed transfer.
pub trait FetchHandle: Send + Sync {
    /// Block until the transfer finishes or `timeout` elapses. `None` waits
    /// forever. Returns `None` if the transfer was still running at the deadline.
    fn wait(&self, timeout: Option<Duration>) -> Option<FetchStatus>;

    /// Bytes received so far.
    fn received(&self) -> usize;

    /// Move the delivered bytes out of the handle. Only meaningful after
    /// `wait` reported completion; a second call returns an empty buffer.
    fn take_data(&self) -> Vec<u8>;

    /// Abort the transfer if it is still running and release its resources.
    fn cancel(&self);
}

pub trait ContentProvider: Send + Sync {
    fn fetch(&self, path: &str) -> Arc<dyn FetchHandle>;
}

/// Provider that never finds anything. Used when the host has no remote origin.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl ContentProvider for NoRemote {
    fn fetch(&self, _path: &str) -> Arc<dyn FetchHandle> {
        Arc::new(CompletedFetch::new(FETCH_STATUS_NOT_FOUND, Vec::new()))
    }
}

/// A fetch that completed before it was handed out.
pub struct CompletedFetch {
    status: u16,
    len: usize,
    data: Mutex<Vec<u8>>,
}

impl CompletedFetch {
    pub fn new(status: u16, data: Vec<u8>) -> Self {
        Self {
            status,
            len: data.len(),
            data: Mutex::new(data),
        }
    }
}

impl FetchHandle for CompletedFetch {
    fn wait(&self, _timeout: Option<Duration>) -> Option<FetchStatus> {
        Some(FetchStatus {
            status: self.status,
            len: self.len,
        })
    }

    fn received(&self) -> usize {
        self.len
    }

    fn take_data(&self) -> Vec<u8> {
        core::mem::take(&mut *self.data.lock())
    }

    fn cancel(&self) {
        self.data.lock().clear();
    }
}

/// Serves content from an in-memory table keyed by path. Handles complete
/// immediately; lookups ignore a leading `/` so both spellings hit.
#[derive(Default)]
pub struct MemoryProvider {
    objects: RwLock<BTreeMap<String, Arc<[u8]>>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: impl Into<Vec<u8>>) {
        let bytes: Vec<u8> = bytes.into();
        self.objects
            .write()
            .insert(Self::key(path).to_string(), Arc::from(bytes));
    }

    pub fn remove(&self, path: &str) {
        self.objects.write().remove(Self::key(path));
    }

    /// Paths requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn key(path: &str) -> &str {
        path.trim_start_matches('/')
    }
}

impl ContentProvider for MemoryProvider {
    fn fetch(&self, path: &str) -> Arc<dyn FetchHandle> {
        self.requests.lock().push(path.to_string());
        match self.objects.read().get(Self::key(path)) {
            Some(bytes) => {
                info!("fetch {}: {} bytes", path, bytes.len());
                Arc::new(CompletedFetch::new(FETCH_STATUS_OK, bytes.to_vec()))
            }
            None => {
                info!("fetch {}: not found", path);
                Arc::new(CompletedFetch::new(FETCH_STATUS_NOT_FOUND, Vec::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_serves_inserted_bytes() {
        let provider = MemoryProvider::new();
        provider.insert("/data/a.txt", b"abc".to_vec());

        let handle = provider.fetch("data/a.txt");
        let status = handle.wait(None).unwrap();
        assert!(status.has_content());
        assert_eq!(status.len, 3);
        assert_eq!(handle.take_data(), b"abc");
        assert!(handle.take_data().is_empty());

        let missing = provider.fetch("/nope");
        assert!(!missing.wait(None).unwrap().has_content());
        assert_eq!(provider.requests(), ["data/a.txt", "/nope"]);
    }

    #[test]
    fn empty_success_is_not_content() {
        let status = FetchStatus {
            status: FETCH_STATUS_OK,
            len: 0,
        };
        assert!(!status.has_content());
    }
}
