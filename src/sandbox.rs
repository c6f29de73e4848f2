//! Path sandbox.
//!
//! Every client-supplied path goes through [`resolve`] before it touches the
//! filesystem. Paths are cleaned lexically, must stay below the storage root
//! and must lie under the configured storage prefix. Symlinks are then
//! resolved so a link inside the store cannot lead outside it.

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::models::BreadCrumb;
use log::debug;
use path_clean::PathClean;
use std::path::{Component, Path, PathBuf};

/// A client path that passed the sandbox check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Cleaned path relative to the storage root, `/`-separated, empty for
    /// the root itself.
    pub relative: String,
    /// `relative` joined onto the storage root.
    pub absolute: PathBuf,
    /// Canonical directory the path must not leave through a link: the
    /// storage prefix directory, or the storage root when there is none.
    pub boundary: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Base name of the resolved path, empty for the storage root.
    pub fn name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or("")
    }
}

pub fn resolve(requested: &str, config: &Config) -> Result<ResolvedPath> {
    let cleaned = Path::new(requested).clean();

    let mut segments = Vec::new();
    for component in cleaned.components() {
        match component {
            Component::Normal(segment) => match segment.to_str() {
                Some(s) => segments.push(s.to_string()),
                None => {
                    return Err(StoreError::InvalidPath(format!(
                        "path is not valid UTF-8: {}",
                        requested
                    )))
                }
            },
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(StoreError::InvalidPath(format!(
                    "path escapes the storage root: {}",
                    requested
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidPath(format!(
                    "absolute paths are not allowed: {}",
                    requested
                )))
            }
        }
    }

    let relative = segments.join("/");
    if !within_prefix(&relative, &config.storage_prefix) {
        return Err(StoreError::InvalidPath(format!(
            "path is outside the storage directory '{}': {}",
            config.storage_prefix, requested
        )));
    }

    let absolute = segments
        .iter()
        .fold(config.storage_root.clone(), |acc, segment| acc.join(segment));
    let boundary = boundary(config);
    if !boundary.starts_with(&config.storage_root) || !stays_inside(&absolute, &boundary) {
        return Err(StoreError::InvalidPath(format!(
            "path leads outside the storage directory through a link: {}",
            requested
        )));
    }
    debug!("Resolved '{}' to '{}'", requested, absolute.display());

    Ok(ResolvedPath {
        relative,
        absolute,
        boundary,
    })
}

/// Canonical storage prefix directory. Falls back to the storage root while
/// the prefix directory does not exist, since nothing below it can either.
fn boundary(config: &Config) -> PathBuf {
    if config.storage_prefix.is_empty() {
        return config.storage_root.clone();
    }
    config
        .storage_root
        .join(&config.storage_prefix)
        .canonicalize()
        .unwrap_or_else(|_| config.storage_root.clone())
}

/// Canonicalizes the deepest existing ancestor of `absolute` and checks it
/// is still below `boundary`, which must itself be canonical.
pub fn stays_inside(absolute: &Path, boundary: &Path) -> bool {
    let mut existing = absolute;
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return canonical.starts_with(boundary);
        }
        match existing.parent() {
            Some(parent) => existing = parent,
            None => return false,
        }
    }
}

fn within_prefix(relative: &str, prefix: &str) -> bool {
    prefix.is_empty() || Path::new(relative).starts_with(Path::new(prefix))
}

/// Joins a child name onto a `/`-separated relative path.
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// One crumb per segment of `relative`, each carrying the prefix up to and
/// including that segment.
pub fn build_breadcrumbs(relative: &str) -> Vec<BreadCrumb> {
    let mut prefix = String::new();
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            prefix = join_relative(&prefix, segment);
            BreadCrumb {
                title: segment.to_string(),
                relative_path: prefix.clone(),
            }
        })
        .collect()
}
