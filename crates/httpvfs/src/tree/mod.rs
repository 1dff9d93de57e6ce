//! Lazily loaded tree overlay.
//!
//! Nodes start out knowing only their action. The first traversal that needs
//! a node's metadata or children calls the action's `load_remote` and
//! materialises the returned [`DirEntry`] in place.
//!
//! Two traversal modes:
//!
//! - [`Link::walk`] is a pure cache read. It never suspends and fails with
//!   [`VfsError::NotLoaded`] the moment it would descend through a node that
//!   has not been loaded.
//! - [`Link::walk_async`] loads unloaded intermediates as it goes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::action::{Capabilities, Context, DirEntry, DynAction, EntryKind};
use crate::vfs::path;
use crate::vfs::{Dirent, FileAttr, FileType, VfsError, VfsResult};

/// How many times a load may be redirected to another action before giving up.
const MAX_REBINDS: usize = 8;

#[derive(Debug)]
struct NodeState {
    kind: Option<FileType>,
    size: Option<u64>,
    mtime: SystemTime,
    atime: SystemTime,
    ctime: SystemTime,
    loaded: bool,
    action: Option<DynAction>,
    children: BTreeMap<String, Link>,
}

/// One filesystem entry, possibly unresolved.
#[derive(Debug)]
pub struct TreeNode {
    state: RwLock<NodeState>,
    /// Serialises loads so that one fetch happens per node.
    gate: tokio::sync::Mutex<()>,
}

impl TreeNode {
    /// An empty node bound to `action`.
    pub fn new(action: Option<DynAction>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(NodeState {
                kind: None,
                size: None,
                mtime: SystemTime::UNIX_EPOCH,
                atime: SystemTime::UNIX_EPOCH,
                ctime: SystemTime::UNIX_EPOCH,
                loaded: false,
                action,
                children: BTreeMap::new(),
            }),
            gate: tokio::sync::Mutex::new(()),
        })
    }

    fn from_entry(entry: &DirEntry) -> Arc<Self> {
        let node = Self::new(None);
        node.describe(entry);
        node
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    /// File or directory, once known.
    pub fn kind(&self) -> Option<FileType> {
        self.state.read().kind
    }

    pub fn action(&self) -> Option<DynAction> {
        self.state.read().action.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.action()
            .map(|a| a.capabilities())
            .unwrap_or(Capabilities::NONE)
    }

    /// Cached attributes, or `None` while the kind is unknown.
    pub fn attr(&self) -> Option<FileAttr> {
        let state = self.state.read();
        let kind = state.kind?;
        let caps = state
            .action
            .as_ref()
            .map(|a| a.capabilities())
            .unwrap_or(Capabilities::NONE);
        let perm = caps.mask(kind.raw_mode());
        let attr = match kind {
            FileType::File => FileAttr::file(state.size.unwrap_or(0), perm),
            FileType::Directory => FileAttr::directory(perm),
        };
        Some(attr.with_times(state.mtime, state.atime, state.ctime))
    }

    pub fn child(&self, name: &str) -> Option<Arc<TreeNode>> {
        self.state.read().children.get(name).map(|l| l.node.clone())
    }

    /// Child names in sorted order.
    pub fn child_names(&self) -> Vec<String> {
        self.state.read().children.keys().cloned().collect()
    }

    /// Children with whatever type information is cached.
    pub fn dirents(&self) -> Vec<Dirent> {
        self.state
            .read()
            .children
            .values()
            .map(|l| Dirent::new(l.name.clone(), l.node.kind()))
            .collect()
    }

    /// Copy the metadata of `entry` onto this node. Leaves `loaded` alone.
    fn describe(&self, entry: &DirEntry) {
        let mut state = self.state.write();
        state.kind = Some(entry.file_type());
        if let Some(size) = entry.size {
            state.size = Some(size);
        }
        if let Some(mtime) = entry.modified {
            state.mtime = mtime;
            state.atime = mtime;
        }
        if let Some(ctime) = entry.created.or(entry.modified) {
            state.ctime = ctime;
        }
        state.action = Some(entry.action.clone());
    }

    /// Load this node, or apply a description obtained elsewhere.
    ///
    /// With `None` the node's own action is asked, unless the node is already
    /// loaded. A loaded `entry` is applied directly; an unloaded one rebinds
    /// the node and then fetches.
    pub fn load_remote<'a>(
        self: &'a Arc<Self>,
        ctx: &'a Context,
        entry: Option<DirEntry>,
    ) -> BoxFuture<'a, VfsResult<()>> {
        async move {
            match entry {
                Some(entry) if entry.is_loaded() => {
                    let _gate = self.gate.lock().await;
                    self.apply(ctx, entry).await
                }
                Some(entry) => {
                    self.describe(&entry);
                    self.load(ctx).await
                }
                None => self.load(ctx).await,
            }
        }
        .boxed()
    }

    /// Fetch through the bound action unless already loaded.
    async fn load(self: &Arc<Self>, ctx: &Context) -> VfsResult<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let _gate = self.gate.lock().await;
        if self.is_loaded() {
            return Ok(());
        }

        for _ in 0..MAX_REBINDS {
            let action = self
                .action()
                .ok_or_else(|| VfsError::other("node has no remote action"))?;
            let entry = action.load_remote(ctx).await?;
            if let EntryKind::UnloadedDir = entry.kind {
                trace!("load redirected to another action");
                self.describe(&entry);
                continue;
            }
            return self.apply(ctx, entry).await;
        }
        Err(VfsError::other(format!(
            "load redirected more than {MAX_REBINDS} times"
        )))
    }

    /// Materialise a loaded description. The caller holds the gate.
    async fn apply(self: &Arc<Self>, ctx: &Context, entry: DirEntry) -> VfsResult<()> {
        self.describe(&entry);
        if let EntryKind::LoadedDir { children } = entry.kind {
            let mut links = BTreeMap::new();
            let mut pending = Vec::new();
            for child in children {
                let Some(name) = child.name.clone() else {
                    tracing::warn!("dropping unnamed listing entry");
                    continue;
                };
                let node = TreeNode::from_entry(&child);
                if child.is_loaded() {
                    pending.push((node.clone(), child));
                }
                links.insert(name.clone(), Link { name, node });
            }
            debug!(children = links.len(), "expanding directory");
            self.state.write().children = links;

            try_join_all(
                pending
                    .iter()
                    .map(|(node, child)| node.load_remote(ctx, Some(child.clone()))),
            )
            .await?;
        }
        self.state.write().loaded = true;
        Ok(())
    }
}

/// Named edge owning a child node.
#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    node: Arc<TreeNode>,
}

impl Link {
    pub fn new(name: impl Into<String>, node: Arc<TreeNode>) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &Arc<TreeNode> {
        &self.node
    }

    /// Descend through cached nodes only.
    ///
    /// `Ok(None)` when a segment does not exist under a loaded directory.
    pub fn walk(&self, steps: &[String]) -> VfsResult<Option<Arc<TreeNode>>> {
        let mut node = self.node.clone();
        for (depth, step) in steps.iter().enumerate() {
            if !node.is_loaded() {
                return Err(VfsError::not_loaded(path::display(&steps[..depth])));
            }
            if node.kind() == Some(FileType::File) {
                return Err(VfsError::not_a_directory(path::display(&steps[..depth])));
            }
            node = match node.child(step) {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        Ok(Some(node))
    }

    /// Descend, loading unloaded intermediates on the way.
    pub async fn walk_async(&self, steps: &[String], ctx: &Context) -> VfsResult<Option<Arc<TreeNode>>> {
        let mut node = self.node.clone();
        for (depth, step) in steps.iter().enumerate() {
            if !node.is_loaded() {
                trace!(path = %path::display(&steps[..depth]), "loading intermediate");
                node.load(ctx).await?;
            }
            if node.kind() == Some(FileType::File) {
                return Err(VfsError::not_a_directory(path::display(&steps[..depth])));
            }
            node = match node.child(step) {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        Ok(Some(node))
    }
}

/// The tree a volume serves, rooted at one node.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Link,
}

impl Tree {
    /// A tree whose root fetches through `action`.
    pub fn new(action: DynAction) -> Self {
        Self {
            root: Link::new("/", TreeNode::new(Some(action))),
        }
    }

    pub fn root(&self) -> &Arc<TreeNode> {
        self.root.node()
    }

    pub fn walk(&self, steps: &[String]) -> VfsResult<Option<Arc<TreeNode>>> {
        self.root.walk(steps)
    }

    pub async fn walk_async(&self, steps: &[String], ctx: &Context) -> VfsResult<Option<Arc<TreeNode>>> {
        self.root.walk_async(steps, ctx).await
    }

    /// Walk to `steps` and load the target itself.
    pub async fn resolve(&self, steps: &[String], ctx: &Context) -> VfsResult<Option<Arc<TreeNode>>> {
        let Some(node) = self.walk_async(steps, ctx).await? else {
            return Ok(None);
        };
        node.load(ctx).await?;
        Ok(Some(node))
    }

    /// Load the root and every directory reachable from it.
    pub async fn load_tree(&self, ctx: &Context) -> VfsResult<()> {
        debug!("preloading tree");
        preload(self.root().clone(), ctx).await
    }
}

fn preload(node: Arc<TreeNode>, ctx: &Context) -> BoxFuture<'_, VfsResult<()>> {
    async move {
        node.load(ctx).await?;
        if node.kind() != Some(FileType::Directory) {
            return Ok(());
        }
        let dirs: Vec<_> = node
            .state
            .read()
            .children
            .values()
            .filter(|l| l.node.kind() == Some(FileType::Directory))
            .map(|l| l.node.clone())
            .collect();
        try_join_all(dirs.into_iter().map(|d| preload(d, ctx))).await?;
        Ok(())
    }
    .boxed()
}
