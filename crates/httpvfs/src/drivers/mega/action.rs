use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;
use url::Url;

use super::api::{ApiContext, SharedApiContext};
use super::download::{download, DownloadOptions};
use super::link::MegaLink;
use super::nodes::{load_attributes, NodeArena};
use crate::action::{Capabilities, Context, DirEntry, Driver, DynAction, ReadStream, RemoteAction};
use crate::http::DynHttpClient;
use crate::vfs::{VfsError, VfsResult};

#[derive(Debug, Clone)]
enum Target {
    /// The linked node, not fetched yet.
    Link(MegaLink),
    /// A node already present in a loaded arena.
    Node { arena: Arc<NodeArena>, id: String },
}

/// Action for a MEGA link or for one node reached through it.
///
/// Loading a link fetches the whole subtree at once, so every child entry
/// comes back loaded and bound to its node in the shared arena.
#[derive(Debug, Clone)]
pub struct MegaAction {
    api: SharedApiContext,
    target: Target,
}

impl MegaAction {
    pub fn from_link(link: MegaLink, api: SharedApiContext) -> Self {
        Self {
            api,
            target: Target::Link(link),
        }
    }

    fn for_node(&self, arena: &Arc<NodeArena>, id: &str) -> Self {
        Self {
            api: self.api.clone(),
            target: Target::Node {
                arena: arena.clone(),
                id: id.to_string(),
            },
        }
    }

    /// Describe `id` and everything below it.
    fn entry(&self, arena: &Arc<NodeArena>, id: &str) -> VfsResult<DirEntry> {
        let node = arena
            .get(id)
            .ok_or_else(|| VfsError::not_found(format!("MEGA node {id}")))?;
        let action: DynAction = Arc::new(self.for_node(arena, id));
        let name = match node.name() {
            Some(name) => name.to_string(),
            None => {
                warn!(node = id, "MEGA node without readable name, using its id");
                id.to_string()
            }
        };

        let mut entry = if node.is_directory {
            let children = arena
                .children(id)
                .map(|child| self.entry(arena, &child.node_id))
                .collect::<VfsResult<Vec<_>>>()?;
            DirEntry::loaded_dir(name, children, action).with_size(0)
        } else {
            DirEntry::file(action).with_name(name).with_size(node.size)
        };
        if let Some(t) = node.modified() {
            entry = entry.with_modified(t).with_created(t);
        }
        Ok(entry)
    }

    async fn resolve(&self, ctx: &Context) -> VfsResult<(Arc<NodeArena>, String)> {
        match &self.target {
            Target::Node { arena, id } => Ok((arena.clone(), id.clone())),
            Target::Link(link) => {
                let (arena, id) = load_attributes(&self.api, ctx, link).await?;
                Ok((Arc::new(arena), id))
            }
        }
    }
}

#[async_trait]
impl RemoteAction for MegaAction {
    fn capabilities(&self) -> Capabilities {
        Capabilities::STREAM
    }

    async fn load_remote(&self, ctx: &Context) -> VfsResult<DirEntry> {
        let (arena, id) = self.resolve(ctx).await?;
        self.entry(&arena, &id)
    }

    fn create_read_stream(&self, ctx: &Context) -> ReadStream {
        self.create_range_stream(ctx, 0, None)
    }

    fn create_range_stream(&self, ctx: &Context, start: u64, end: Option<u64>) -> ReadStream {
        let options = DownloadOptions::range(start, end);
        match &self.target {
            Target::Node { arena, id } => match arena.get(id) {
                Some(node) => download(self.api.clone(), ctx, node, options),
                None => ReadStream::failed(VfsError::not_found(format!("MEGA node {id}"))),
            },
            Target::Link(_) => {
                let this = self.clone();
                let ctx = ctx.clone();
                ReadStream::deferred(
                    async move {
                        let (arena, id) = this.resolve(&ctx).await?;
                        let node = arena
                            .get(&id)
                            .ok_or_else(|| VfsError::not_found(format!("MEGA node {id}")))?;
                        Ok(download(this.api.clone(), &ctx, node, options))
                    }
                    .boxed(),
                )
            }
        }
    }
}

/// Driver for `mega.nz` links.
#[derive(Debug, Clone, Default)]
pub struct MegaDriver {
    gateway: Option<Url>,
    max_retries: u32,
}

impl MegaDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another API gateway.
    pub fn with_gateway(mut self, gateway: Url) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Retry busy (`EAGAIN`) responses up to `n` times.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }
}

impl Driver for MegaDriver {
    fn name(&self) -> &str {
        "mega"
    }

    fn accepts(&self, url: &Url) -> bool {
        MegaLink::looks_like_link(url)
    }

    fn create_action(&self, url: &Url, http: DynHttpClient) -> VfsResult<DynAction> {
        let link = MegaLink::parse(url)?;
        let mut api = ApiContext::new(http).with_max_retries(self.max_retries);
        if let Some(gateway) = &self.gateway {
            api = api.with_gateway(gateway.clone());
        }
        Ok(Arc::new(MegaAction::from_link(link, Arc::new(api))))
    }
}
