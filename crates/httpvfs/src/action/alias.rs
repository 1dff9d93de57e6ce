use std::sync::Arc;

use async_trait::async_trait;

use super::{Capabilities, Context, DirEntry, DynAction, EntryKind, ReadStream, RemoteAction};
use crate::vfs::VfsResult;

/// Name used when neither the configuration, the entry, nor the URL gives one.
pub const DEFAULT_ALIAS: &str = "index.html";

/// Presents a root that loads as a single file as a directory holding it.
///
/// Directory roots pass through unchanged.
#[derive(Debug, Clone)]
pub struct RootAliasAction {
    inner: DynAction,
    alias: Option<String>,
    url_name: Option<String>,
}

impl RootAliasAction {
    /// Wrap `inner`. `alias` overrides the child's name; `url_name` is used
    /// when the loaded entry has no name of its own.
    pub fn new(inner: DynAction, alias: Option<String>, url_name: Option<String>) -> Self {
        Self {
            inner,
            alias,
            url_name,
        }
    }
}

#[async_trait]
impl RemoteAction for RootAliasAction {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn load_remote(&self, ctx: &Context) -> VfsResult<DirEntry> {
        let entry = self.inner.load_remote(ctx).await?;
        if !matches!(entry.kind, EntryKind::File { .. }) {
            return Ok(entry);
        }

        let name = self
            .alias
            .clone()
            .or_else(|| entry.name.clone())
            .or_else(|| self.url_name.clone())
            .unwrap_or_else(|| DEFAULT_ALIAS.to_string());
        tracing::debug!(name = %name, "aliasing root file");

        let created = entry.created;
        let modified = entry.modified;
        let child = entry.with_name(name);
        let mut dir = DirEntry::loaded_dir("/", vec![child], Arc::new(self.clone()));
        dir.modified = modified;
        dir.created = created;
        Ok(dir)
    }

    fn create_read_stream(&self, ctx: &Context) -> ReadStream {
        self.inner.create_read_stream(ctx)
    }

    fn create_range_stream(&self, ctx: &Context, start: u64, end: Option<u64>) -> ReadStream {
        self.inner.create_range_stream(ctx, start, end)
    }
}
