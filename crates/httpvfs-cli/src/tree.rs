//! Volume listing as an ASCII tree.

use futures::future::BoxFuture;
use futures::FutureExt;
use httpvfs::{FileType, VfsResult, Volume};

/// A listed node and the part of its subtree that was visited.
#[derive(Debug, Clone, PartialEq)]
pub struct Listed {
    pub name: String,
    pub kind: Option<FileType>,
    pub size: Option<u64>,
    pub children: Vec<Listed>,
}

fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Walk `path` down to `max_depth` levels, fetching as needed.
pub fn collect<'a>(
    volume: &'a Volume,
    path: String,
    name: String,
    depth: u32,
    max_depth: Option<u32>,
) -> BoxFuture<'a, VfsResult<Listed>> {
    async move {
        let attr = volume.stat(&path).await?;
        let mut listed = Listed {
            name,
            kind: Some(attr.kind),
            size: attr.is_file().then_some(attr.size),
            children: Vec::new(),
        };
        if attr.is_dir() && max_depth.is_none_or(|max| depth < max) {
            for entry in volume.readdir_with_types(&path).await? {
                let child = join(&path, &entry.name);
                listed
                    .children
                    .push(collect(volume, child, entry.name, depth + 1, max_depth).await?);
            }
        }
        Ok(listed)
    }
    .boxed()
}

/// Format a collected tree as lines.
pub fn format_tree(root: &Listed) -> Vec<String> {
    let mut lines = Vec::new();
    format_node(root, 0, "", true, &mut lines);
    lines
}

fn format_node(node: &Listed, depth: usize, prefix: &str, is_last: bool, lines: &mut Vec<String>) {
    let connector = if depth == 0 {
        ""
    } else if is_last {
        "└─ "
    } else {
        "├─ "
    };
    let label = match (node.kind, node.size) {
        (Some(FileType::Directory), _) => format!("{}/", node.name.trim_end_matches('/')),
        (_, Some(size)) => format!("{} ({})", node.name, human_size(size)),
        _ => node.name.clone(),
    };
    lines.push(format!("{prefix}{connector}{label}"));

    let child_prefix = if depth == 0 {
        String::new()
    } else if is_last {
        format!("{prefix}   ")
    } else {
        format!("{prefix}│  ")
    };
    for (i, child) in node.children.iter().enumerate() {
        let last = i == node.children.len() - 1;
        format_node(child, depth + 1, &child_prefix, last, lines);
    }
}

/// Sizes in binary units, one decimal above bytes.
pub fn human_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> Listed {
        Listed {
            name: name.into(),
            kind: Some(FileType::File),
            size: Some(size),
            children: Vec::new(),
        }
    }

    fn dir(name: &str, children: Vec<Listed>) -> Listed {
        Listed {
            name: name.into(),
            kind: Some(FileType::Directory),
            size: None,
            children,
        }
    }

    #[test]
    fn test_format_tree() {
        let root = dir(
            "/",
            vec![
                dir("Dir1", vec![file("a.txt", 3), dir("deep", vec![file("b", 2048)])]),
                file("File1.md", 13),
            ],
        );
        assert_eq!(
            format_tree(&root),
            vec![
                "/",
                "├─ Dir1/",
                "│  ├─ a.txt (3 B)",
                "│  └─ deep/",
                "│     └─ b (2.0 KiB)",
                "└─ File1.md (13 B)",
            ]
        );
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(10 * 1024 * 1024), "10.0 MiB");
    }
}
