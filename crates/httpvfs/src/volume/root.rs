//! Late binding of the root URL to a driver.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use super::config::RootFileAlias;
use crate::action::{
    Capabilities, Context, DirEntry, DriverRegistry, DynAction, ReadStream, RemoteAction, RootAliasAction,
};
use crate::drivers::http::name_from_url;
use crate::http::DynHttpClient;
use crate::vfs::VfsResult;

/// Root action that picks its driver on first use.
///
/// Construction of a volume stays free of I/O and of driver errors until the
/// root is actually touched.
pub(crate) struct RootBinding {
    url: Url,
    registry: Arc<DriverRegistry>,
    http: DynHttpClient,
    alias: RootFileAlias,
    bound: Mutex<Option<DynAction>>,
}

impl std::fmt::Debug for RootBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootBinding")
            .field("url", &self.url.as_str())
            .field("alias", &self.alias)
            .field("bound", &self.bound.lock().is_some())
            .finish()
    }
}

impl RootBinding {
    pub(crate) fn new(url: Url, registry: Arc<DriverRegistry>, http: DynHttpClient, alias: RootFileAlias) -> Self {
        Self {
            url,
            registry,
            http,
            alias,
            bound: Mutex::new(None),
        }
    }

    fn bind(&self) -> VfsResult<DynAction> {
        let mut bound = self.bound.lock();
        if let Some(action) = bound.as_ref() {
            return Ok(action.clone());
        }
        let mut action = self.registry.create_action(&self.url, self.http.clone())?;
        if self.alias.is_enabled() {
            action = Arc::new(RootAliasAction::new(
                action,
                self.alias.name().map(str::to_string),
                name_from_url(&self.url),
            ));
        }
        debug!(url = %self.url, "bound root action");
        *bound = Some(action.clone());
        Ok(action)
    }
}

#[async_trait]
impl RemoteAction for RootBinding {
    fn capabilities(&self) -> Capabilities {
        self.bound
            .lock()
            .as_ref()
            .map(|a| a.capabilities())
            .unwrap_or(Capabilities::STREAM)
    }

    async fn load_remote(&self, ctx: &Context) -> VfsResult<DirEntry> {
        let action = self.bind()?;
        action.load_remote(ctx).await
    }

    fn create_read_stream(&self, ctx: &Context) -> ReadStream {
        match self.bind() {
            Ok(action) => action.create_read_stream(ctx),
            Err(e) => ReadStream::failed(e),
        }
    }

    fn create_range_stream(&self, ctx: &Context, start: u64, end: Option<u64>) -> ReadStream {
        match self.bind() {
            Ok(action) => action.create_range_stream(ctx, start, end),
            Err(e) => ReadStream::failed(e),
        }
    }
}
