//! Path normalisation into tree steps.

use std::path::{Component, Path};

use super::{VfsError, VfsResult};

/// Split `path` into the names walked from the root.
///
/// `.` is dropped and `..` pops, never above the root. Relative paths are
/// taken from the root.
pub fn steps(path: &Path) -> VfsResult<Vec<String>> {
    let mut result: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => {
                let s = s
                    .to_str()
                    .ok_or_else(|| VfsError::invalid_path(path.to_string_lossy()))?;
                result.push(s.to_string());
            }
        }
    }
    Ok(result)
}

/// Render steps back into an absolute path string for messages.
pub fn display(steps: &[String]) -> String {
    format!("/{}", steps.join("/"))
}
