use crate::error::{Result, StoreError};
use path_clean::PathClean;
use std::env;
use std::path::{Component, Path, PathBuf};

pub const DEFAULT_TREE_MAX_DEPTH: usize = 10;
pub const DEFAULT_PATH_TREE_MAX_DEPTH: usize = 3;

/// Process-wide settings, read once at startup and shared read-only with
/// every handler.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute, canonical directory every client path resolves beneath.
    pub storage_root: PathBuf,
    /// Relative prefix that client paths must start with. Empty allows the
    /// whole storage root.
    pub storage_prefix: String,
    pub tree_max_depth: usize,
    pub path_tree_max_depth: usize,
    pub host: String,
    pub port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl Config {
    pub fn new(storage_root: impl Into<PathBuf>, storage_prefix: impl Into<String>) -> Result<Self> {
        let storage_root = storage_root.into();
        if !storage_root.is_dir() {
            return Err(StoreError::Config(format!(
                "storage root is not a directory: {}",
                storage_root.display()
            )));
        }
        let storage_root = storage_root.canonicalize().map_err(|e| {
            StoreError::Config(format!(
                "failed to canonicalize storage root '{}': {}",
                storage_root.display(),
                e
            ))
        })?;

        Ok(Config {
            storage_root,
            storage_prefix: clean_prefix(&storage_prefix.into())?,
            tree_max_depth: DEFAULT_TREE_MAX_DEPTH,
            path_tree_max_depth: DEFAULT_PATH_TREE_MAX_DEPTH,
            host: "0.0.0.0".to_string(),
            port: 8080,
            cert_path: None,
            key_path: None,
        })
    }

    pub fn from_env() -> Result<Self> {
        let storage_root = env::var("FILE_STORAGE_PATH")
            .map_err(|_| StoreError::Config("missing FILE_STORAGE_PATH".into()))?;
        let storage_prefix = env::var("FILE_STORAGE_DIRECTORY").unwrap_or_default();

        let mut config = Config::new(storage_root, storage_prefix)?;
        config.tree_max_depth = parse_var("TREE_MAX_DEPTH", DEFAULT_TREE_MAX_DEPTH)?;
        config.path_tree_max_depth = parse_var("PATH_TREE_MAX_DEPTH", DEFAULT_PATH_TREE_MAX_DEPTH)?;
        config.host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        config.port = parse_var("PORT", 8080)?;
        config.cert_path = env::var("CERT_PATH").ok().map(PathBuf::from);
        config.key_path = env::var("KEY_PATH").ok().map(PathBuf::from);
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Normalizes the storage prefix to the same `/`-separated form that
/// resolved client paths take, so prefix matching compares like with like.
fn clean_prefix(raw: &str) -> Result<String> {
    let cleaned = Path::new(raw.trim_start_matches('/')).clean();
    let mut segments = Vec::new();
    for component in cleaned.components() {
        match component {
            Component::Normal(segment) => match segment.to_str() {
                Some(s) => segments.push(s),
                None => {
                    return Err(StoreError::Config(format!(
                        "storage prefix is not valid UTF-8: {}",
                        raw
                    )))
                }
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::Config(format!(
                    "storage prefix must stay below the storage root: {}",
                    raw
                )))
            }
        }
    }
    Ok(segments.join("/"))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| StoreError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_canonicalizes_root_and_trims_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::new(temp_dir.path(), "/Storage/").unwrap();

        assert_eq!(config.storage_root, temp_dir.path().canonicalize().unwrap());
        assert_eq!(config.storage_prefix, "Storage");
        assert_eq!(config.tree_max_depth, DEFAULT_TREE_MAX_DEPTH);
        assert_eq!(config.path_tree_max_depth, DEFAULT_PATH_TREE_MAX_DEPTH);
    }

    #[test]
    fn test_new_cleans_prefix() {
        let temp_dir = TempDir::new().unwrap();

        for (raw, expected) in [
            ("./Storage/", "Storage"),
            ("Storage//photos/", "Storage/photos"),
            ("Storage/tmp/..", "Storage"),
            (".", ""),
            ("", ""),
        ] {
            let config = Config::new(temp_dir.path(), raw).unwrap();
            assert_eq!(config.storage_prefix, expected, "prefix {:?}", raw);
        }
    }

    #[test]
    fn test_new_rejects_prefix_above_root() {
        let temp_dir = TempDir::new().unwrap();

        for raw in ["../x", "Storage/../../x"] {
            assert!(
                matches!(Config::new(temp_dir.path(), raw), Err(StoreError::Config(_))),
                "expected {:?} to be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");

        assert!(matches!(
            Config::new(&missing, ""),
            Err(StoreError::Config(_))
        ));
    }
}
