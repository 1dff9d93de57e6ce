//! The volume: a filesystem call surface over one remote root.
//!
//! Every path operation comes in two flavours:
//!
//! - `*_sync` reads only what is cached. It never suspends and fails with
//!   [`VfsError::NotLoaded`] if the path crosses a node that has not been
//!   loaded. Open with `preload` (or await [`Volume::load_remote`] /
//!   [`Volume::preload`]) before relying on it.
//! - the async form walks the tree, fetching whatever it needs.
//!
//! Both resolve the path to a tree node first and then operate on the node.

mod config;
mod fd;
mod root;

pub use config::{RootFileAlias, VolumeConfig};
pub use fd::{FdTable, OpenFile};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::action::{Context, DriverRegistry, ReadStream};
use crate::http::{DynHttpClient, ReqwestHttpClient};
use crate::tree::{Tree, TreeNode};
use crate::vfs::path;
use crate::vfs::{AccessMode, Dirent, FileAttr, FileType, OpenFlags, VfsError, VfsOps, VfsResult};
use root::RootBinding;

/// Builder for [`Volume`].
#[derive(Debug)]
pub struct VolumeBuilder {
    url: String,
    config: VolumeConfig,
    registry: Option<Arc<DriverRegistry>>,
    http: Option<DynHttpClient>,
}

impl VolumeBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: VolumeConfig::default(),
            registry: None,
            http: None,
        }
    }

    pub fn with_config(mut self, config: VolumeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.config.preload = preload;
        self
    }

    pub fn with_root_file_alias(mut self, alias: impl Into<RootFileAlias>) -> Self {
        self.config.root_file_alias = alias.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Drivers to pick the root action from. Defaults to
    /// [`DriverRegistry::with_defaults`].
    pub fn with_registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Transport for every request. Defaults to [`ReqwestHttpClient`].
    pub fn with_http_client(mut self, http: DynHttpClient) -> Self {
        self.http = Some(http);
        self
    }

    /// Build without touching the network. `preload` is ignored.
    pub fn build(self) -> VfsResult<Volume> {
        let url = Url::parse(&self.url)?;
        if url.cannot_be_a_base() {
            return Err(VfsError::invalid_url(self.url));
        }
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(DriverRegistry::with_defaults()));
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let binding = RootBinding::new(url.clone(), registry, http, self.config.root_file_alias.clone());

        let context = Context {
            proxy: self.config.proxy.clone(),
        };
        Ok(Volume {
            url,
            config: self.config,
            tree: Tree::new(Arc::new(binding)),
            context: RwLock::new(context),
            fds: FdTable::default(),
        })
    }

    /// Build and, when `preload` is set, resolve the whole tree.
    pub async fn open(self) -> VfsResult<Volume> {
        let volume = self.build()?;
        if volume.config.preload {
            volume.preload().await?;
        }
        Ok(volume)
    }
}

/// A remote tree exposed through filesystem calls.
pub struct Volume {
    url: Url,
    config: VolumeConfig,
    tree: Tree,
    context: RwLock<Context>,
    fds: FdTable,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("url", &self.url.as_str())
            .field("config", &self.config)
            .field("open_files", &self.fds.len())
            .finish()
    }
}

impl Volume {
    /// A lazy volume over `url` with the default registry and transport.
    pub fn new(url: impl Into<String>, config: VolumeConfig) -> VfsResult<Self> {
        VolumeBuilder::new(url).with_config(config).build()
    }

    pub fn builder(url: impl Into<String>) -> VolumeBuilder {
        VolumeBuilder::new(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    // ========================================================================
    // Context
    // ========================================================================

    /// The context used by calls on this handle.
    pub fn context(&self) -> Context {
        self.context.read().clone()
    }

    /// Replace the context for subsequent calls.
    pub fn set_context(&self, ctx: Context) {
        *self.context.write() = ctx;
    }

    pub fn with_context(self, ctx: Context) -> Self {
        self.set_context(ctx);
        self
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the root.
    pub async fn load_remote(&self) -> VfsResult<()> {
        let ctx = self.context();
        self.tree.root().load_remote(&ctx, None).await
    }

    /// Load the root and every directory below it.
    pub async fn preload(&self) -> VfsResult<()> {
        self.tree.load_tree(&self.context()).await
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn resolve_sync(&self, p: &Path) -> VfsResult<Arc<TreeNode>> {
        let steps = path::steps(p)?;
        self.tree
            .walk(&steps)?
            .ok_or_else(|| VfsError::not_found(path::display(&steps)))
    }

    async fn resolve(&self, p: &Path) -> VfsResult<Arc<TreeNode>> {
        let steps = path::steps(p)?;
        self.tree
            .resolve(&steps, &self.context())
            .await?
            .ok_or_else(|| VfsError::not_found(path::display(&steps)))
    }

    fn attr_of(node: &TreeNode, p: &Path) -> VfsResult<FileAttr> {
        node.attr()
            .ok_or_else(|| VfsError::not_loaded(p.display().to_string()))
    }

    fn listing_of(node: &TreeNode, p: &Path) -> VfsResult<()> {
        match node.kind() {
            Some(FileType::File) => Err(VfsError::not_a_directory(p.display().to_string())),
            _ if !node.is_loaded() => Err(VfsError::not_loaded(p.display().to_string())),
            _ => Ok(()),
        }
    }

    fn check_access(attr: &FileAttr, mode: AccessMode, p: &Path) -> VfsResult<()> {
        if mode.permitted_by(attr.perm) {
            Ok(())
        } else {
            Err(VfsError::permission_denied(p.display().to_string()))
        }
    }

    fn open_node(&self, node: Arc<TreeNode>, p: &Path, flags: OpenFlags) -> VfsResult<u64> {
        let attr = Self::attr_of(&*node, p)?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(p.display().to_string()));
        }
        let mode = AccessMode {
            read: flags.read,
            write: flags.write,
        };
        Self::check_access(&attr, mode, p)?;
        let fd = self.fds.insert(OpenFile {
            path: p.display().to_string(),
            node,
            flags,
        });
        debug!(fd, path = %p.display(), "opened");
        Ok(fd)
    }

    fn writable(file: &OpenFile) -> VfsResult<()> {
        if !file.flags.write || !file.node.capabilities().write {
            return Err(VfsError::permission_denied(file.path.clone()));
        }
        Ok(())
    }

    // ========================================================================
    // Cache-only calls
    // ========================================================================

    pub fn stat_sync(&self, p: impl AsRef<Path>) -> VfsResult<FileAttr> {
        let p = p.as_ref();
        Self::attr_of(&*self.resolve_sync(p)?, p)
    }

    /// Same as [`Volume::stat_sync`]; there are no links to not follow.
    pub fn lstat_sync(&self, p: impl AsRef<Path>) -> VfsResult<FileAttr> {
        self.stat_sync(p)
    }

    pub fn readdir_sync(&self, p: impl AsRef<Path>) -> VfsResult<Vec<String>> {
        let p = p.as_ref();
        let node = self.resolve_sync(p)?;
        Self::listing_of(&node, p)?;
        Ok(node.child_names())
    }

    pub fn readdir_with_types_sync(&self, p: impl AsRef<Path>) -> VfsResult<Vec<Dirent>> {
        let p = p.as_ref();
        let node = self.resolve_sync(p)?;
        Self::listing_of(&node, p)?;
        Ok(node.dirents())
    }

    /// Whether the path exists in the cached tree. Still fails with
    /// `NotLoaded` when the answer is not cached.
    pub fn exists_sync(&self, p: impl AsRef<Path>) -> VfsResult<bool> {
        let steps = path::steps(p.as_ref())?;
        Ok(self.tree.walk(&steps)?.is_some())
    }

    pub fn access_sync(&self, p: impl AsRef<Path>, mode: AccessMode) -> VfsResult<()> {
        let p = p.as_ref();
        let attr = self.stat_sync(p)?;
        Self::check_access(&attr, mode, p)
    }

    pub fn open_sync(&self, p: impl AsRef<Path>, flags: OpenFlags) -> VfsResult<u64> {
        let p = p.as_ref();
        let node = self.resolve_sync(p)?;
        self.open_node(node, p, flags)
    }

    pub fn close_sync(&self, fd: u64) -> VfsResult<()> {
        self.fds.remove(fd)
    }

    /// Positional read through the node's raw read hook.
    ///
    /// Stream-only nodes have no synchronous read and fail with
    /// `PermissionDenied`; use [`Volume::read`] for those.
    pub fn read_sync(&self, fd: u64, buf: &mut [u8], position: u64) -> VfsResult<usize> {
        let file = self.fds.get(fd)?;
        match file.node.action() {
            Some(action) if action.capabilities().read => action.read(buf, position),
            _ => Err(VfsError::permission_denied(file.path)),
        }
    }

    pub fn write_sync(&self, fd: u64, data: &[u8], position: u64) -> VfsResult<usize> {
        let file = self.fds.get(fd)?;
        Self::writable(&file)?;
        let action = file
            .node
            .action()
            .ok_or_else(|| VfsError::permission_denied(file.path.clone()))?;
        action.write(data, position)
    }

    pub fn truncate_sync(&self, p: impl AsRef<Path>, len: u64) -> VfsResult<()> {
        let p = p.as_ref();
        let node = self.resolve_sync(p)?;
        Self::truncate_node(&node, p, len)
    }

    fn truncate_node(node: &TreeNode, p: &Path, len: u64) -> VfsResult<()> {
        if !node.capabilities().write {
            return Err(VfsError::permission_denied(p.display().to_string()));
        }
        Err(VfsError::not_implemented(format!(
            "truncate {} to {len}",
            p.display()
        )))
    }

    // ========================================================================
    // Fetching calls
    // ========================================================================

    pub async fn stat(&self, p: impl AsRef<Path>) -> VfsResult<FileAttr> {
        let p = p.as_ref();
        Self::attr_of(&*self.resolve(p).await?, p)
    }

    pub async fn lstat(&self, p: impl AsRef<Path>) -> VfsResult<FileAttr> {
        self.stat(p).await
    }

    pub async fn readdir(&self, p: impl AsRef<Path>) -> VfsResult<Vec<String>> {
        let p = p.as_ref();
        let node = self.resolve(p).await?;
        Self::listing_of(&node, p)?;
        Ok(node.child_names())
    }

    pub async fn readdir_with_types(&self, p: impl AsRef<Path>) -> VfsResult<Vec<Dirent>> {
        let p = p.as_ref();
        let node = self.resolve(p).await?;
        Self::listing_of(&node, p)?;
        Ok(node.dirents())
    }

    /// Whether the path exists, fetching parents as needed.
    pub async fn exists(&self, p: impl AsRef<Path>) -> VfsResult<bool> {
        let steps = path::steps(p.as_ref())?;
        Ok(self.tree.walk_async(&steps, &self.context()).await?.is_some())
    }

    pub async fn access(&self, p: impl AsRef<Path>, mode: AccessMode) -> VfsResult<()> {
        let p = p.as_ref();
        let attr = self.stat(p).await?;
        Self::check_access(&attr, mode, p)
    }

    pub async fn open(&self, p: impl AsRef<Path>, flags: OpenFlags) -> VfsResult<u64> {
        let p = p.as_ref();
        let node = self.resolve(p).await?;
        self.open_node(node, p, flags)
    }

    pub async fn close(&self, fd: u64) -> VfsResult<()> {
        self.close_sync(fd)
    }

    /// Read up to `len` bytes at `position` from an open descriptor.
    ///
    /// Uses the raw read hook when the node has one, otherwise a ranged
    /// stream.
    pub async fn read(&self, fd: u64, position: u64, len: usize) -> VfsResult<Bytes> {
        let file = self.fds.get(fd)?;
        let action = file
            .node
            .action()
            .ok_or_else(|| VfsError::permission_denied(file.path.clone()))?;
        let caps = action.capabilities();
        if caps.read {
            let mut buf = vec![0u8; len];
            let n = action.read(&mut buf, position)?;
            buf.truncate(n);
            return Ok(Bytes::from(buf));
        }
        if !caps.stream {
            return Err(VfsError::permission_denied(file.path));
        }
        if len == 0 {
            return Ok(Bytes::new());
        }
        let end = position.saturating_add(len as u64 - 1);
        let end = match file.node.attr() {
            Some(attr) if file.node.is_loaded() => {
                if position >= attr.size {
                    return Ok(Bytes::new());
                }
                end.min(attr.size - 1)
            }
            _ => end,
        };
        action
            .create_range_stream(&self.context(), position, Some(end))
            .collect_bytes()
            .await
    }

    pub async fn write(&self, fd: u64, data: &[u8], position: u64) -> VfsResult<usize> {
        self.write_sync(fd, data, position)
    }

    pub async fn truncate(&self, p: impl AsRef<Path>, len: u64) -> VfsResult<()> {
        let p = p.as_ref();
        let node = self.resolve(p).await?;
        Self::truncate_node(&node, p, len)
    }

    /// Whole content of a file.
    pub async fn read_file(&self, p: impl AsRef<Path>) -> VfsResult<Bytes> {
        self.create_read_stream(p).collect_bytes().await
    }

    /// Stream a file's content.
    ///
    /// Returns at once. Resolution and the fetch happen on first poll and
    /// their failures arrive as stream errors.
    pub fn create_read_stream(&self, p: impl AsRef<Path>) -> ReadStream {
        self.create_range_stream(p, 0, None)
    }

    /// Stream bytes `start..=end` of a file, or to its end.
    pub fn create_range_stream(&self, p: impl AsRef<Path>, start: u64, end: Option<u64>) -> ReadStream {
        let p = p.as_ref().to_path_buf();
        let tree = self.tree.clone();
        let ctx = self.context();
        ReadStream::deferred(
            async move {
                let steps = path::steps(&p)?;
                let node = tree
                    .walk_async(&steps, &ctx)
                    .await?
                    .ok_or_else(|| VfsError::not_found(path::display(&steps)))?;
                if node.kind() == Some(FileType::Directory) {
                    return Err(VfsError::is_a_directory(path::display(&steps)));
                }
                let action = node
                    .action()
                    .ok_or_else(|| VfsError::not_loaded(path::display(&steps)))?;
                if !action.capabilities().stream {
                    return Err(VfsError::permission_denied(path::display(&steps)));
                }
                Ok(if start == 0 && end.is_none() {
                    action.create_read_stream(&ctx)
                } else {
                    action.create_range_stream(&ctx, start, end)
                })
            }
            .boxed(),
        )
    }
}

#[async_trait]
impl VfsOps for Volume {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.stat(path).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<Dirent>> {
        self.readdir_with_types(path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let fd = self.open(path, OpenFlags::read()).await?;
        let result = Volume::read(self, fd, offset, size as usize).await;
        self.close_sync(fd)?;
        Ok(result?.to_vec())
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let fd = self.open(path, OpenFlags::write()).await?;
        let result = Volume::write(self, fd, data, offset).await;
        self.close_sync(fd)?;
        Ok(result? as u32)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        Volume::truncate(self, path, size).await
    }

    fn read_only(&self) -> bool {
        !self.tree.root().capabilities().write
    }
}
