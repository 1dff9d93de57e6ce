//! VFS error types.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::drivers::mega::ProtocolError;

/// Boxed error used as the cause of transport failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A synchronous call needed a node that has not been fetched yet.
    #[error("not loaded: {0}")]
    NotLoaded(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The node's action lacks the requested capability.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Response shape or option the driver does not support.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Root URL or link could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Unknown file descriptor.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(u64),

    /// Requested byte range lies outside the content.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Response body or key material could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Negative response code from the MEGA API.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotLoaded error.
    pub fn not_loaded(path: impl Into<String>) -> Self {
        Self::NotLoaded(path.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a NotImplemented error.
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl(url.into())
    }

    /// Create a Decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for `NotLoaded`.
    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Self::NotLoaded(_))
    }

    /// The protocol error carried by this error, if any.
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

/// Transport-level failure wrapping the underlying cause.
#[derive(Debug, Error)]
#[error("connection error: {message}")]
pub struct ConnectionError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ConnectionError {
    /// Wrap `source` with a message describing what was attempted.
    pub fn new(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// A connection error with no underlying cause.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// The message without the cause.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<url::ParseError> for VfsError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<serde_json::Error> for VfsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotLoaded(msg) => io::Error::new(io::ErrorKind::WouldBlock, msg),
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotImplemented(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::InvalidPath(msg) | VfsError::InvalidUrl(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::BadDescriptor(fd) => {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad file descriptor: {fd}"))
            }
            VfsError::InvalidRange(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Decode(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            VfsError::Connection(e) => io::Error::new(io::ErrorKind::ConnectionAborted, e),
            VfsError::Protocol(e) => io::Error::other(e),
            VfsError::Io(e) => e,
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
