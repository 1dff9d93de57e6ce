//! Filesystem call surface.
//!
//! - [`VfsOps`] - Async path-based operations implemented by [`crate::Volume`]
//! - [`FileAttr`], [`Dirent`] - stat and typed readdir shapes
//! - [`VfsError`] - the one error type every layer returns
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: operations take paths which are split into
//!   steps and walked through the lazy tree.
//! - **Explicit offset/size**: reads take offset and size; descriptors only
//!   remember the node they were opened on.

mod error;
mod ops;
pub mod path;
mod types;

pub use error::{BoxError, ConnectionError, VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{AccessMode, Dirent, FileAttr, FileType, OpenFlags};
