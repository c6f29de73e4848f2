use crate::config::Config;
use crate::models::{DeletionReport, Node, NodeKind};
use crate::sandbox::resolve;
use log::{debug, warn};
use std::fs;
use std::io;

/// Deletes every node of the client-supplied forest and sums the reports.
pub fn delete_all(nodes: &[Node], config: &Config) -> DeletionReport {
    let mut report = DeletionReport::default();
    for node in nodes {
        report.merge(delete_subtree(node, config));
    }
    report
}

/// Removes `node` and everything below it, children before parents.
///
/// Each file and directory in the submitted subtree is attempted exactly
/// once and counted as one success or one failure. A failed removal never
/// stops its siblings or its parent from being attempted, so a directory
/// left non-empty by a failed child is itself reported as a failure.
pub fn delete_subtree(node: &Node, config: &Config) -> DeletionReport {
    let mut report = DeletionReport::default();

    if node.is_dir() {
        for child in node.children.iter().flatten() {
            report.merge(delete_subtree(child, config));
        }
    }

    match remove_node(node, config) {
        Ok(()) => {
            debug!("Deleted '{}'", node.path);
            report.success_count += 1;
        }
        Err(e) => {
            warn!("Failed to delete '{}': {}", node.path, e);
            report.failure_count += 1;
        }
    }
    report
}

fn remove_node(node: &Node, config: &Config) -> io::Result<()> {
    let resolved = resolve(&node.path, config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    if resolved.is_root() {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "refusing to delete the storage root",
        ));
    }

    match node.kind {
        NodeKind::File => fs::remove_file(&resolved.absolute),
        NodeKind::Directory => fs::remove_dir(&resolved.absolute),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_system::build_tree;
    use tempfile::TempDir;

    fn setup(prefix: &str) -> (TempDir, Config) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path(), prefix).unwrap();
        (temp_dir, config)
    }

    fn dir(name: &str, path: &str, children: Vec<Node>) -> Node {
        let mut node = Node::directory(name, path);
        node.children = Some(children);
        node
    }

    #[test]
    fn test_deletes_whole_subtree() {
        let (temp_dir, config) = setup("");
        let root = temp_dir.path();
        fs::create_dir_all(root.join("album/2024/summer")).unwrap();
        fs::write(root.join("album/cover.png"), b"png").unwrap();
        fs::write(root.join("album/2024/a.jpg"), b"a").unwrap();
        fs::write(root.join("album/2024/summer/b.jpg"), b"b").unwrap();

        let tree = build_tree(&resolve("album", &config).unwrap(), 10).unwrap();
        let report = delete_subtree(&tree, &config);

        // 3 files + 3 directories
        assert_eq!(report.success_count, 6);
        assert_eq!(report.failure_count, 0);
        assert_eq!(report.attempted(), tree.count());
        assert!(!root.join("album").exists());
    }

    #[test]
    fn test_second_delete_reports_every_item_as_failure() {
        let (temp_dir, config) = setup("");
        fs::create_dir(temp_dir.path().join("tmp")).unwrap();
        fs::write(temp_dir.path().join("tmp/x.txt"), b"x").unwrap();

        let tree = build_tree(&resolve("tmp", &config).unwrap(), 10).unwrap();
        let first = delete_subtree(&tree, &config);
        let second = delete_subtree(&tree, &config);

        assert_eq!(first, DeletionReport { success_count: 2, failure_count: 0 });
        assert_eq!(second, DeletionReport { success_count: 0, failure_count: 2 });
    }

    #[test]
    fn test_failed_child_does_not_stop_siblings() {
        let (temp_dir, config) = setup("");
        let root = temp_dir.path();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("d/a.txt"), b"a").unwrap();
        fs::write(root.join("d/c.txt"), b"c").unwrap();
        fs::write(root.join("d/z.txt"), b"z").unwrap();

        // Stale listing: missing.txt no longer exists and z.txt was never listed.
        let request = dir(
            "d",
            "d",
            vec![
                Node::file("missing.txt", "d/missing.txt"),
                Node::file("a.txt", "d/a.txt"),
                Node::file("c.txt", "d/c.txt"),
            ],
        );
        let report = delete_subtree(&request, &config);

        assert_eq!(report.success_count, 2);
        assert_eq!(report.failure_count, 2);
        assert!(!root.join("d/a.txt").exists());
        assert!(!root.join("d/c.txt").exists());
        assert!(root.join("d/z.txt").exists());
    }

    #[test]
    fn test_file_node_ignores_children() {
        let (temp_dir, config) = setup("");
        fs::write(temp_dir.path().join("f.txt"), b"f").unwrap();

        let mut node = Node::file("f.txt", "f.txt");
        node.children = Some(vec![Node::file("ghost", "f.txt/ghost")]);
        let report = delete_subtree(&node, &config);

        assert_eq!(report, DeletionReport { success_count: 1, failure_count: 0 });
    }

    #[test]
    fn test_sandbox_violations_are_counted() {
        let (temp_dir, config) = setup("Storage");
        fs::create_dir(temp_dir.path().join("Storage")).unwrap();
        fs::write(temp_dir.path().join("outside.txt"), b"keep").unwrap();
        fs::write(temp_dir.path().join("Storage/in.txt"), b"in").unwrap();

        let nodes = vec![
            Node::file("outside.txt", "outside.txt"),
            Node::file("passwd", "../../etc/passwd"),
            Node::file("in.txt", "Storage/in.txt"),
        ];
        let report = delete_all(&nodes, &config);

        assert_eq!(report, DeletionReport { success_count: 1, failure_count: 2 });
        assert!(temp_dir.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_root_is_not_followed() {
        let (temp_dir, config) = setup("");
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("victim.txt"), b"keep").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("link")).unwrap();

        let request = dir(
            "link",
            "link",
            vec![Node::file("victim.txt", "link/victim.txt")],
        );
        let report = delete_subtree(&request, &config);

        assert_eq!(report, DeletionReport { success_count: 0, failure_count: 2 });
        assert!(outside.path().join("victim.txt").exists());
    }

    #[test]
    fn test_refuses_storage_root() {
        let (temp_dir, config) = setup("");
        fs::write(temp_dir.path().join("a.txt"), b"a").unwrap();

        let tree = build_tree(&resolve("", &config).unwrap(), 10).unwrap();
        let report = delete_subtree(&tree, &config);

        assert_eq!(report, DeletionReport { success_count: 1, failure_count: 1 });
        assert!(temp_dir.path().exists());
    }
}
