use crate::error::{Result, StoreError};
use crate::models::Node;
use crate::sandbox::{join_relative, ResolvedPath};
use log::{debug, warn};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Builds the listing tree rooted at `root`.
///
/// Entries are ordered directories first, then by name. Directories are
/// expanded while the current depth is below `max_depth`, counting the root
/// listing as depth 0; deeper directories come back with `children: None`.
/// Only a failure to list `root` itself is an error. Entries that cannot be
/// stat'ed and subdirectories that cannot be read are logged and skipped.
/// Directories reached through a link that leaves `root.boundary` are
/// listed but never expanded.
pub fn build_tree(root: &ResolvedPath, max_depth: usize) -> Result<Node> {
    debug!(
        "Building file tree for directory: {} (max depth {})",
        root.absolute.display(),
        max_depth
    );

    let mut walk = Walk {
        boundary: &root.boundary,
        max_depth,
        ancestors: HashSet::new(),
    };
    if let Ok(canonical) = root.absolute.canonicalize() {
        walk.ancestors.insert(canonical);
    }

    let children = walk
        .list_children(&root.absolute, &root.relative, 0)
        .map_err(|source| StoreError::Read {
            path: root.relative.clone(),
            source,
        })?;

    let mut node = Node::directory(root.name(), root.relative.clone());
    node.children = Some(children);
    Ok(node)
}

struct Entry {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

struct Walk<'a> {
    boundary: &'a Path,
    max_depth: usize,
    /// Canonical paths of the directories on the current descent chain.
    ancestors: HashSet<PathBuf>,
}

impl Walk<'_> {
    fn list_children(
        &mut self,
        dir: &Path,
        relative: &str,
        depth: usize,
    ) -> io::Result<Vec<Node>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read directory entry in '{}': {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("Skipping entry with non UTF-8 name: {:?}", raw);
                    continue;
                }
            };
            // Follows symlinks, so a link is listed as whatever it points at.
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping '{}': stat failed: {}", path.display(), e);
                    continue;
                }
            };
            entries.push(Entry {
                name,
                path,
                is_dir: metadata.is_dir(),
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let child_relative = join_relative(relative, &entry.name);
            if !entry.is_dir {
                nodes.push(Node::file(entry.name, child_relative));
                continue;
            }

            let mut node = Node::directory(entry.name, child_relative);
            if depth < self.max_depth {
                node.children = self.expand(&entry.path, &node.path, depth + 1);
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    fn expand(&mut self, dir: &Path, relative: &str, depth: usize) -> Option<Vec<Node>> {
        let canonical = match dir.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("Not expanding '{}': {}", dir.display(), e);
                return None;
            }
        };
        if !canonical.starts_with(self.boundary) {
            warn!(
                "Not expanding '{}': it links outside the storage directory",
                dir.display()
            );
            return None;
        }
        if !self.ancestors.insert(canonical.clone()) {
            warn!(
                "Not expanding '{}': it links back to '{}'",
                dir.display(),
                canonical.display()
            );
            return None;
        }

        let children = match self.list_children(dir, relative, depth) {
            Ok(children) => Some(children),
            Err(e) => {
                warn!("Failed to read directory '{}': {}", dir.display(), e);
                None
            }
        };
        self.ancestors.remove(&canonical);
        children
    }
}
