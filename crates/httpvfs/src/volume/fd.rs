//! Open file descriptors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::tree::TreeNode;
use crate::vfs::{OpenFlags, VfsError, VfsResult};

/// First descriptor handed out, past the standard streams.
const FIRST_FD: u64 = 3;

/// An open node.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub path: String,
    pub node: Arc<TreeNode>,
    pub flags: OpenFlags,
}

#[derive(Debug)]
pub struct FdTable {
    next: AtomicU64,
    open: DashMap<u64, OpenFile>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(FIRST_FD),
            open: DashMap::new(),
        }
    }
}

impl FdTable {
    pub fn insert(&self, file: OpenFile) -> u64 {
        let fd = self.next.fetch_add(1, Ordering::Relaxed);
        self.open.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: u64) -> VfsResult<OpenFile> {
        self.open
            .get(&fd)
            .map(|f| f.clone())
            .ok_or(VfsError::BadDescriptor(fd))
    }

    pub fn remove(&self, fd: u64) -> VfsResult<()> {
        self.open
            .remove(&fd)
            .map(|_| ())
            .ok_or(VfsError::BadDescriptor(fd))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
