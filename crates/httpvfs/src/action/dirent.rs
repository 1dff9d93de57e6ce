//! Descriptions returned by `load_remote`.

use std::time::SystemTime;

use super::DynAction;
use crate::vfs::FileType;

/// Shape of a loaded description.
#[derive(Debug, Clone)]
pub enum EntryKind {
    /// A file. `loaded: false` means only the action is known yet.
    File { loaded: bool },
    /// A directory whose listing has not been fetched.
    UnloadedDir,
    /// A directory with its listing.
    LoadedDir { children: Vec<DirEntry> },
}

/// Description of one remote node.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Name under the parent. Required for children.
    pub name: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    /// Action to install on the node.
    pub action: DynAction,
    pub kind: EntryKind,
}

impl DirEntry {
    fn new(action: DynAction, kind: EntryKind) -> Self {
        Self {
            name: None,
            size: None,
            modified: None,
            created: None,
            action,
            kind,
        }
    }

    /// A fully described file.
    pub fn file(action: DynAction) -> Self {
        Self::new(action, EntryKind::File { loaded: true })
    }

    /// A directory that still needs a fetch.
    pub fn unloaded_dir(action: DynAction) -> Self {
        Self::new(action, EntryKind::UnloadedDir)
    }

    /// A directory with its children.
    pub fn loaded_dir(name: impl Into<String>, children: Vec<DirEntry>, action: DynAction) -> Self {
        Self::new(action, EntryKind::LoadedDir { children }).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, t: SystemTime) -> Self {
        self.modified = Some(t);
        self
    }

    pub fn with_created(mut self, t: SystemTime) -> Self {
        self.created = Some(t);
        self
    }

    /// Mark a file entry as loaded or not. No effect on directories.
    pub fn loaded(mut self, loaded: bool) -> Self {
        if let EntryKind::File { loaded: l } = &mut self.kind {
            *l = loaded;
        }
        self
    }

    /// Whether applying this entry needs no further fetch.
    pub fn is_loaded(&self) -> bool {
        match self.kind {
            EntryKind::File { loaded } => loaded,
            EntryKind::UnloadedDir => false,
            EntryKind::LoadedDir { .. } => true,
        }
    }

    pub fn file_type(&self) -> FileType {
        match self.kind {
            EntryKind::File { .. } => FileType::File,
            EntryKind::UnloadedDir | EntryKind::LoadedDir { .. } => FileType::Directory,
        }
    }
}
