//! # httpvfs
//!
//! A lazily loaded virtual filesystem over remote trees.
//!
//! A [`Volume`] is opened on a root URL. The URL's host picks a driver from
//! the [`DriverRegistry`]: plain `http(s)` servers are probed with HEAD and
//! their directory listings scraped; MEGA links are resolved through the
//! MEGA API and decrypted on the fly. Nodes are fetched one path segment at a
//! time, the first time a call needs them.
//!
//! ```no_run
//! # async fn demo() -> httpvfs::VfsResult<()> {
//! use httpvfs::{Volume, VolumeConfig};
//!
//! let volume = Volume::new("http://127.0.0.1:8000/", VolumeConfig::default())?;
//! for name in volume.readdir("/").await? {
//!     println!("{name}");
//! }
//! let readme = volume.read_file("/README.md").await?;
//! # let _ = readme;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod drivers;
pub mod http;
pub mod tree;
pub mod vfs;
pub mod volume;

pub use action::{
    Capabilities, Context, DirEntry, Driver, DriverRegistry, DynAction, EntryKind, Progress, ReadStream,
    RemoteAction, Transform,
};
pub use drivers::{HttpAction, HttpDriver, MegaAction, MegaDriver};
pub use drivers::mega::ProtocolError;
pub use http::{DynHttpClient, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use tree::{Link, Tree, TreeNode};
pub use vfs::{
    AccessMode, ConnectionError, Dirent, FileAttr, FileType, OpenFlags, VfsError, VfsOps, VfsResult,
};
pub use volume::{RootFileAlias, Volume, VolumeBuilder, VolumeConfig};
