//! Diagnostics: `ls -lR`-style listings through `log` and serializable
//! snapshots of a subtree.

use alloc::{string::String, sync::Arc, vec::Vec};

use log::{info, warn};
use serde::Serialize;

use crate::{
    common::{InodeKind, TimeSpec},
    error::{FsError, FsResult},
    fs::Filesystem,
    fs_bail,
    inode::Inode,
    path::absolute_path,
    MAX_DIRECTORY_DEPTH,
};

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub ino: u64,
    pub name: String,
    pub kind: InodeKind,
    /// `rwxr-x---` style.
    pub mode: String,
    pub uid: u32,
    pub gid: u32,
    pub size: usize,
    pub loaded: bool,
    pub fetching: bool,
    pub mtime: TimeSpec,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    fn capture(node: &Arc<Inode>, depth: usize) -> Self {
        let attr = node.attr();
        let children = if depth < MAX_DIRECTORY_DEPTH {
            node.children()
                .iter()
                .map(|c| NodeSnapshot::capture(c, depth + 1))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            ino: node.ino(),
            name: String::from(node.name()),
            kind: node.kind(),
            mode: String::from_utf8_lossy(&attr.perm.symbolic()).into_owned(),
            uid: attr.uid,
            gid: attr.gid,
            size: node.size(),
            loaded: node.has_content(),
            fetching: node.has_pending_fetch(),
            mtime: attr.mtime,
            children,
        }
    }
}

fn ls_line(node: &Inode) -> String {
    let attr = node.attr();
    let kind = if node.is_dir() { 'd' } else { '-' };
    let state = match (node.is_dir(), node.has_content(), node.has_pending_fetch()) {
        (true, _, _) => "",
        (false, _, true) => " [fetching]",
        (false, false, false) => " [remote]",
        (false, true, false) => "",
    };
    alloc::format!(
        "{}{} {:>5} {:>5} {:>10} {}{}",
        kind,
        String::from_utf8_lossy(&attr.perm.symbolic()),
        attr.uid,
        attr.gid,
        node.size(),
        node.name(),
        state
    )
}

fn dump_dir(dir: &Arc<Inode>, prefix: &str, depth: usize) {
    if depth >= MAX_DIRECTORY_DEPTH {
        warn!("{}: deeper than {} levels, not listed", prefix, MAX_DIRECTORY_DEPTH);
        return;
    }
    info!("{}:", if prefix.is_empty() { "/" } else { prefix });
    let children = dir.children();
    for child in &children {
        info!("  {}", ls_line(child));
    }
    for child in children.iter().filter(|c| c.is_dir()) {
        let path = alloc::format!("{}/{}", prefix, child.name());
        dump_dir(child, &path, depth + 1);
    }
}

impl Filesystem {
    /// Log the subtree at `path`, one `ls -l` line per node, directory by
    /// directory.
    pub fn dump_tree(&self, path: &str) -> FsResult<()> {
        let node = match self.lookup(path) {
            Some(node) => node,
            None => fs_bail!("dump_tree", FsError::NotFound, "pathname does not exist"),
        };
        if !node.is_dir() {
            info!("{}", ls_line(&node));
            return Ok(());
        }
        let prefix = match absolute_path(&node) {
            p if p == "/" => String::new(),
            p => p,
        };
        dump_dir(&node, &prefix, 0);
        Ok(())
    }

    pub fn snapshot(&self, path: &str) -> FsResult<NodeSnapshot> {
        match self.lookup(path) {
            Some(node) => Ok(NodeSnapshot::capture(&node, 0)),
            None => fs_bail!("snapshot", FsError::NotFound, "pathname does not exist"),
        }
    }

    /// [`snapshot`](Self::snapshot) rendered as pretty-printed JSON.
    pub fn snapshot_json(&self, path: &str) -> FsResult<String> {
        let snapshot = self.snapshot(path)?;
        serde_json::to_string_pretty(&snapshot).map_err(|_| FsError::Io)
    }
}
