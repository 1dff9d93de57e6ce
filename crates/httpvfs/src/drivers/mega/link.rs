//! MEGA share links.

use url::Url;

use super::crypto::b64_decode;
use crate::vfs::{VfsError, VfsResult};

/// A parsed public link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MegaLink {
    /// `/file/<id>#<key>` or `#!<id>!<key>`.
    File { id: String, key: [u8; 32] },
    /// `/folder/<id>#<key>[/file/<sub>]` or `#F!<id>!<key>[!<sub>]`.
    Folder {
        id: String,
        key: [u8; 16],
        /// Descendant the link points at inside the folder.
        loaded_file: Option<String>,
    },
}

fn file_key(s: &str) -> VfsResult<[u8; 32]> {
    let raw = b64_decode(s)?;
    <[u8; 32]>::try_from(raw.as_slice())
        .map_err(|_| VfsError::invalid_url(format!("file key must be 32 bytes, got {}", raw.len())))
}

fn folder_key(s: &str) -> VfsResult<[u8; 16]> {
    let raw = b64_decode(s)?;
    <[u8; 16]>::try_from(raw.as_slice())
        .map_err(|_| VfsError::invalid_url(format!("folder key must be 16 bytes, got {}", raw.len())))
}

fn non_empty(s: Option<&str>, what: &str, url: &Url) -> VfsResult<String> {
    match s {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(VfsError::invalid_url(format!("{url}: missing {what}"))),
    }
}

impl MegaLink {
    /// Whether `url` has the shape of a MEGA link, without decoding keys.
    pub fn looks_like_link(url: &Url) -> bool {
        let path = url.path();
        let fragment = url.fragment().unwrap_or("");
        path.starts_with("/file/")
            || path.starts_with("/folder/")
            || fragment.starts_with('!')
            || fragment.starts_with("F!")
    }

    pub fn parse(url: &Url) -> VfsResult<Self> {
        let fragment = url.fragment().unwrap_or("");
        let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

        match segments.next() {
            Some("file") => {
                let id = non_empty(segments.next(), "file id", url)?;
                Ok(Self::File {
                    id,
                    key: file_key(fragment)?,
                })
            }
            Some("folder") => {
                let id = non_empty(segments.next(), "folder id", url)?;
                // Key, optionally followed by `/file/<sub>` or `/folder/<sub>`.
                let mut parts = fragment.split('/');
                let key = folder_key(parts.next().unwrap_or(""))?;
                let loaded_file = match (parts.next(), parts.next()) {
                    (Some("file" | "folder"), Some(sub)) if !sub.is_empty() => Some(sub.to_string()),
                    _ => None,
                };
                Ok(Self::Folder {
                    id,
                    key,
                    loaded_file,
                })
            }
            _ => Self::parse_legacy(url, fragment),
        }
    }

    fn parse_legacy(url: &Url, fragment: &str) -> VfsResult<Self> {
        if let Some(rest) = fragment.strip_prefix("F!") {
            let mut parts = rest.split('!');
            let id = non_empty(parts.next(), "folder id", url)?;
            let key = folder_key(parts.next().unwrap_or(""))?;
            let loaded_file = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            return Ok(Self::Folder {
                id,
                key,
                loaded_file,
            });
        }
        if let Some(rest) = fragment.strip_prefix('!') {
            let mut parts = rest.split('!');
            let id = non_empty(parts.next(), "file id", url)?;
            let key = file_key(parts.next().unwrap_or(""))?;
            return Ok(Self::File { id, key });
        }
        Err(VfsError::invalid_url(format!("not a MEGA link: {url}")))
    }

    /// Public id of the file or folder.
    pub fn id(&self) -> &str {
        match self {
            Self::File { id, .. } | Self::Folder { id, .. } => id,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder { .. })
    }
}
