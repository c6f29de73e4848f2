use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    #[serde(alias = "folder")]
    Directory,
}

/// One entry of a listing. `path` is relative to the storage root and always
/// uses `/` as separator. `children` is `None` for files and for directories
/// that were not expanded; an expanded empty directory carries `Some(vec![])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Node>>,
}

impl Node {
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::File,
            path: path.into(),
            children: None,
        }
    }

    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::Directory,
            path: path.into(),
            children: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Number of filesystem objects in this subtree, the node itself included.
    pub fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(Node::count)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreadCrumb {
    pub title: String,
    #[serde(rename = "relativePath")]
    pub relative_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub success_count: usize,
    pub failure_count: usize,
}

impl DeletionReport {
    pub fn merge(&mut self, other: DeletionReport) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
    }

    pub fn attempted(&self) -> usize {
        self.success_count + self.failure_count
    }
}

#[derive(Deserialize)]
pub struct DirectoryQuery {
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    #[serde(rename = "fileName")]
    pub file_name: String,
}

#[derive(Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "destPath")]
    pub dest_path: Option<String>,
}

#[derive(Deserialize)]
pub struct DirectoryRequest {
    pub directory: String,
}

#[derive(Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "filesToBeDeleted")]
    pub files_to_be_deleted: Vec<Node>,
}

#[derive(Serialize)]
pub struct TreeResponse {
    pub data: Node,
    pub path: Vec<BreadCrumb>,
    pub message: String,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    #[serde(flatten)]
    pub report: DeletionReport,
    pub message: String,
}
