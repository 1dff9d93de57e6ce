//! Remote actions: the per-node capability that knows how to fetch a node.
//!
//! Every tree node owns one [`RemoteAction`]. Loading a node calls
//! [`RemoteAction::load_remote`], which returns a [`DirEntry`] describing the
//! node and, for directories, its children with their own actions.

mod alias;
mod dirent;
pub mod registry;
mod stream;

pub use alias::RootAliasAction;
pub use dirent::{DirEntry, EntryKind};
pub use registry::{Driver, DriverRegistry};
pub use stream::{Progress, ReadStream, SkipBytes, Transform};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::vfs::{VfsError, VfsResult};

/// Per-call options threaded through every action call.
///
/// Contexts are parameters, never node state: a volume carries a default and
/// callers swap it between batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Proxy used for every request made on behalf of this call.
    pub proxy: Option<Url>,
}

impl Context {
    /// A context with no proxy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests through `proxy`.
    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// What an action can do besides loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `create_read_stream` is supported.
    pub stream: bool,
    /// Raw positional `read` is supported.
    pub read: bool,
    /// Raw positional `write` is supported.
    pub write: bool,
}

impl Capabilities {
    /// Nothing beyond loading.
    pub const NONE: Capabilities = Capabilities {
        stream: false,
        read: false,
        write: false,
    };

    /// Streaming reads only; what both bundled drivers offer.
    pub const STREAM: Capabilities = Capabilities {
        stream: true,
        read: false,
        write: false,
    };

    /// Whether the node can be read by any means.
    pub fn readable(&self) -> bool {
        self.stream || self.read
    }

    /// Mask raw mode bits: no read clears `0o444`, no write clears `0o222`.
    pub fn mask(&self, raw: u32) -> u32 {
        let mut mode = raw;
        if !self.readable() {
            mode &= !0o444;
        }
        if !self.write {
            mode &= !0o222;
        }
        mode
    }
}

/// A node's remote behavior.
#[async_trait]
pub trait RemoteAction: Send + Sync + std::fmt::Debug {
    /// What this action supports.
    fn capabilities(&self) -> Capabilities;

    /// Fetch the description of this node.
    async fn load_remote(&self, ctx: &Context) -> VfsResult<DirEntry>;

    /// Open a byte stream over the node's content.
    ///
    /// Returns immediately; I/O starts when the stream is first polled.
    fn create_read_stream(&self, _ctx: &Context) -> ReadStream {
        ReadStream::failed(VfsError::permission_denied("stream not supported"))
    }

    /// Open a byte stream over `start..=end`, or to the end when `end` is
    /// `None`. The default skips and truncates the full stream.
    fn create_range_stream(&self, ctx: &Context, start: u64, end: Option<u64>) -> ReadStream {
        let stream = self.create_read_stream(ctx).pipe(SkipBytes::new(start));
        match end {
            Some(end) if end < start => ReadStream::empty(),
            Some(end) => stream.limit(end - start + 1),
            None => stream,
        }
    }

    /// Raw positional read into `buf`.
    fn read(&self, _buf: &mut [u8], _position: u64) -> VfsResult<usize> {
        Err(VfsError::permission_denied("read not supported"))
    }

    /// Raw positional write of `data`.
    fn write(&self, _data: &[u8], _position: u64) -> VfsResult<usize> {
        Err(VfsError::permission_denied("write not supported"))
    }
}

/// Shared handle to an action.
pub type DynAction = Arc<dyn RemoteAction>;
