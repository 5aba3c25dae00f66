use serde::{Deserialize, Serialize};

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    Blob,
    /// Directory.
    Tree,
    /// Submodule pointer.
    Commit,
}

/// One entry of a recursive tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Repository-relative path, `/`-separated.
    pub path: String,
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl TreeEntry {
    /// A file entry.
    pub fn blob(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
        }
    }

    /// A directory entry.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Tree,
        }
    }

    /// Whether this entry is a regular file.
    pub fn is_blob(&self) -> bool {
        self.kind == EntryKind::Blob
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    is_dir: bool,
    children: Vec<Node>,
}

impl Node {
    fn child_dir(&mut self, name: &str) -> &mut Node {
        let idx = match self
            .children
            .iter()
            .position(|c| c.is_dir && c.name == name)
        {
            Some(idx) => idx,
            None => {
                self.children.push(Node {
                    name: name.to_string(),
                    is_dir: true,
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    fn render(&self, depth: usize, out: &mut Vec<String>) {
        for child in &self.children {
            let suffix = if child.is_dir { "/" } else { "" };
            out.push(format!("{}{}{}", "    ".repeat(depth), child.name, suffix));
            child.render(depth + 1, out);
        }
    }
}

/// Render entries as an indented text tree.
///
/// Four spaces per level, directories suffixed with `/`, siblings in first-seen
/// order. Directory entries appear even when they end up with no files under
/// them; submodule entries are skipped.
///
/// # Examples
///
/// ```
/// use repovet_github::{render_tree, TreeEntry};
///
/// let entries = vec![
///     TreeEntry::blob("README.md"),
///     TreeEntry::blob("src/main.rs"),
///     TreeEntry::blob("src/util/io.rs"),
/// ];
/// assert_eq!(
///     render_tree(&entries),
///     "README.md\nsrc/\n    main.rs\n    util/\n        io.rs"
/// );
/// ```
pub fn render_tree(entries: &[TreeEntry]) -> String {
    let mut root = Node::default();
    for entry in entries {
        if entry.kind == EntryKind::Commit {
            continue;
        }
        let parts: Vec<&str> = entry.path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((last, dirs)) = parts.split_last() else {
            continue;
        };
        let mut current = &mut root;
        for dir in dirs {
            current = current.child_dir(dir);
        }
        match entry.kind {
            EntryKind::Tree => {
                current.child_dir(last);
            }
            _ => {
                if !current
                    .children
                    .iter()
                    .any(|c| !c.is_dir && c.name == *last)
                {
                    current.children.push(Node {
                        name: (*last).to_string(),
                        is_dir: false,
                        children: Vec::new(),
                    });
                }
            }
        }
    }

    let mut lines = Vec::new();
    root.render(0, &mut lines);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_renders_empty() {
        assert_eq!(render_tree(&[]), "");
    }

    #[test]
    fn explicit_directories_are_kept() {
        let entries = vec![
            TreeEntry::dir("docs"),
            TreeEntry::dir("src"),
            TreeEntry::blob("src/lib.rs"),
        ];
        assert_eq!(render_tree(&entries), "docs/\nsrc/\n    lib.rs");
    }

    #[test]
    fn directory_entries_do_not_duplicate_implied_ones() {
        let entries = vec![
            TreeEntry::blob("a/b/c.py"),
            TreeEntry::dir("a"),
            TreeEntry::dir("a/b"),
            TreeEntry::blob("a/d.py"),
        ];
        assert_eq!(render_tree(&entries), "a/\n    b/\n        c.py\n    d.py");
    }

    #[test]
    fn submodules_are_skipped() {
        let entries = vec![
            TreeEntry {
                path: "vendor/lib".into(),
                kind: EntryKind::Commit,
            },
            TreeEntry::blob("main.go"),
        ];
        assert_eq!(render_tree(&entries), "main.go");
    }

    #[test]
    fn entry_kind_deserializes_from_api_shape() {
        let json = r#"[{"path":"src","type":"tree"},{"path":"src/a.rs","type":"blob","sha":"x","mode":"100644"}]"#;
        let entries: Vec<TreeEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0], TreeEntry::dir("src"));
        assert!(entries[1].is_blob());
    }
}
