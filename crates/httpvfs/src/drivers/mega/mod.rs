//! MEGA cloud-storage driver.
//!
//! - [`link`] parses public file and folder links
//! - [`api`] frames requests to the JSON command gateway
//! - [`nodes`] rebuilds a folder's flat node list into an arena
//! - [`crypto`] unwraps keys, decrypts attributes and content
//! - [`download`] streams a decrypted byte range

mod action;
pub mod api;
pub mod crypto;
pub mod download;
mod error;
pub mod link;
pub mod nodes;

pub use action::{MegaAction, MegaDriver};
pub use api::{ApiContext, SharedApiContext};
pub use download::DownloadOptions;
pub use error::{ProtocolError, TIME_LEFT_HEADER};
pub use link::MegaLink;
pub use nodes::{DownloadId, MegaNode, NodeArena};

/// Numeric API codes with dedicated handling.
pub mod codes {
    pub use super::error::{EAGAIN, EBLOCKED, EKEY, ENOENT, ERATELIMIT};
}
