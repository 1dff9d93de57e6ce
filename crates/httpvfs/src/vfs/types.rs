//! Core VFS types.
//!
//! Shapes returned by the volume's stat/readdir surface. Remote trees have no
//! owners or link counts, so those fields carry fixed values.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Raw mode bits before the capability mask is applied.
    pub fn raw_mode(&self) -> u32 {
        match self {
            FileType::File => 0o666,
            FileType::Directory => 0o777,
        }
    }
}

/// File attributes (metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttr {
    /// Size in bytes.
    pub size: u64,
    /// File type.
    pub kind: FileType,
    /// Unix permissions after masking by the node's capabilities.
    pub perm: u32,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last access time.
    pub atime: SystemTime,
    /// Creation time.
    pub ctime: SystemTime,
    /// Number of hard links.
    pub nlink: u32,
}

impl FileAttr {
    /// Attributes for a file with unknown timestamps.
    pub fn file(size: u64, perm: u32) -> Self {
        Self::new(FileType::File, size, perm)
    }

    /// Attributes for a directory with unknown timestamps.
    pub fn directory(perm: u32) -> Self {
        Self::new(FileType::Directory, 0, perm)
    }

    fn new(kind: FileType, size: u64, perm: u32) -> Self {
        Self {
            size,
            kind,
            perm,
            mtime: SystemTime::UNIX_EPOCH,
            atime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
            nlink: if kind.is_dir() { 2 } else { 1 },
        }
    }

    /// Set all three timestamps.
    pub fn with_times(mut self, mtime: SystemTime, atime: SystemTime, ctime: SystemTime) -> Self {
        self.mtime = mtime;
        self.atime = atime;
        self.ctime = ctime;
        self
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Typed directory entry, as returned by `readdir_with_types`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type, `None` while the child has not been loaded.
    pub kind: Option<FileType>,
}

impl Dirent {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: Option<FileType>) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, Some(FileType::File))
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, Some(FileType::Directory))
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// Access check mode for `access`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessMode {
    pub read: bool,
    pub write: bool,
}

impl AccessMode {
    /// Existence check only.
    pub const EXISTS: AccessMode = AccessMode {
        read: false,
        write: false,
    };
    /// Read permission.
    pub const READ: AccessMode = AccessMode {
        read: true,
        write: false,
    };
    /// Write permission.
    pub const WRITE: AccessMode = AccessMode {
        read: false,
        write: true,
    };

    /// Whether `perm` grants this mode to the owner.
    pub fn permitted_by(&self, perm: u32) -> bool {
        (!self.read || perm & 0o400 != 0) && (!self.write || perm & 0o200 != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert_eq!(FileType::File.raw_mode(), 0o666);
    }

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(1024, 0o444);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);
        assert_eq!(file.nlink, 1);

        let dir = FileAttr::directory(0o555);
        assert!(dir.is_dir());
        assert_eq!(dir.nlink, 2);
    }

    #[test]
    fn test_dirent() {
        let file = Dirent::file("test.txt");
        assert_eq!(file.kind, Some(FileType::File));

        let unknown = Dirent::new("later", None);
        assert!(unknown.kind.is_none());
    }

    #[test]
    fn test_access_mode() {
        assert!(AccessMode::READ.permitted_by(0o444));
        assert!(!AccessMode::WRITE.permitted_by(0o444));
        assert!(AccessMode::EXISTS.permitted_by(0));
    }
}
