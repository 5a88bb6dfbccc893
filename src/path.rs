//! Path resolution over the inode tree.
//!
//! Paths are `/`-separated; empty segments (repeated or trailing slashes) are
//! skipped. `.` stays on the current directory and `..` climbs to the parent,
//! the root being its own parent. Names match exactly and case-sensitively.

use alloc::{string::String, sync::Arc, vec::Vec};

use log::debug;

use crate::{
    common::{InodeKind, Permission},
    error::{FsError, FsResult},
    inode::{Inode, InodeAllocator},
    MAX_DIRECTORY_DEPTH,
};

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split `path` into the directory part and the final component. Trailing
/// slashes are ignored; a path naming the root yields an empty final component.
pub fn split_last(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => (&trimmed[..=i], &trimmed[i + 1..]),
        None if path.starts_with('/') => ("/", ""),
        None => ("", trimmed),
    }
}

/// One step of the walk from the directory `node`.
fn step(node: &Arc<Inode>, segment: &str) -> Option<Arc<Inode>> {
    if !node.is_dir() {
        return None;
    }
    match segment {
        "." => Some(node.clone()),
        ".." => Some(node.parent().unwrap_or_else(|| node.clone())),
        name => node.child(name),
    }
}

/// The inode `path` names, walking from `root`. `""` and `"/"` are `root`.
pub fn resolve(root: &Arc<Inode>, path: &str) -> Option<Arc<Inode>> {
    let mut node = root.clone();
    for segment in segments(path) {
        node = step(&node, segment)?;
    }
    Some(node)
}

/// The directory that holds the final component of `path`, whether or not
/// that component exists. `None` if an intermediate directory is missing.
pub fn resolve_parent(root: &Arc<Inode>, path: &str) -> Option<Arc<Inode>> {
    let (dir, _) = split_last(path);
    resolve(root, dir)
}

/// Walk the directory part of `path`, creating missing directories with
/// `perm`, and return the directory that will hold the final component.
pub fn ensure_directory_chain(
    alloc: &InodeAllocator,
    root: &Arc<Inode>,
    path: &str,
    perm: Permission,
) -> FsResult<Arc<Inode>> {
    let (dir, _) = split_last(path);
    let mut node = root.clone();
    for segment in segments(dir) {
        if !node.is_dir() {
            return Err(FsError::NotDirectory);
        }
        node = match step(&node, segment) {
            Some(next) => next,
            None => {
                let created = alloc.create(segment, InodeKind::Directory, perm)?;
                match created.link(&node) {
                    Ok(()) => {
                        debug!("ensure_directory_chain: created directory \"{}\"", segment);
                        created
                    }
                    // Lost a race with another creator, use theirs.
                    Err(FsError::Exists) => node.child(segment).ok_or(FsError::NotFound)?,
                    Err(e) => return Err(e),
                }
            }
        };
    }
    if !node.is_dir() {
        return Err(FsError::NotDirectory);
    }
    Ok(node)
}

/// Absolute path of `node`, `/` for the root. At most
/// [`MAX_DIRECTORY_DEPTH`] ancestors are walked.
pub fn absolute_path(node: &Arc<Inode>) -> String {
    let mut stack = Vec::new();
    let mut cur = node.clone();
    while let Some(parent) = cur.parent() {
        if stack.len() == MAX_DIRECTORY_DEPTH {
            break;
        }
        stack.push(cur);
        cur = parent;
    }
    if stack.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for n in stack.iter().rev() {
        out.push('/');
        out.push_str(n.name());
    }
    out
}

/// Lexically join `path` onto the absolute directory `base`, folding `.` and
/// `..`. Used to name remote objects by absolute path.
pub fn normalize(base: &str, path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let start = if path.starts_with('/') { "" } else { base };
    for segment in segments(start).chain(segments(path)) {
        match segment {
            "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    out
}
