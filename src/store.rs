//! File store collaborator and the YAML records kept in it.
//!
//! Paths are `/`-separated and relative to the store root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::StoreError;

/// Key-value file store addressable by path and by record id.
pub trait FileStore {
    fn read_text(&self, path: &str) -> Result<String, StoreError>;

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Path of the record named `{id}{suffix}`, wherever it lives.
    fn find_by_id(&self, id: &str, suffix: &str) -> Result<String, StoreError>;

    fn exists(&self, id: &str, suffix: &str) -> bool {
        self.find_by_id(id, suffix).is_ok()
    }
}

/// Envelope shared by every persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<C> {
    pub id: String,
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    pub content: C,
}

/// Read and decode a YAML document.
pub fn read_yaml<T: DeserializeOwned>(store: &dyn FileStore, path: &str) -> Result<T, StoreError> {
    let text = store.read_text(path)?;
    serde_yaml::from_str(&text).map_err(|e| StoreError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Encode a value as YAML and write it.
pub fn write_yaml<T: Serialize>(store: &dyn FileStore, path: &str, value: &T) -> Result<(), StoreError> {
    let text = serde_yaml::to_string(value).map_err(|e| StoreError::Encode {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    store.write(path, text.as_bytes())
}

/// Directory part of a store path, empty for top-level entries.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Join store path segments, skipping empty ones.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// In-memory store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

impl FileStore for MemoryStore {
    fn read_text(&self, path: &str) -> Result<String, StoreError> {
        self.files
            .read()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .ok_or_else(|| StoreError::PathNotFound {
                path: path.to_string(),
            })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.files.write().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn find_by_id(&self, id: &str, suffix: &str) -> Result<String, StoreError> {
        let wanted = format!("{}{}", id, suffix);
        self.files
            .read()
            .keys()
            .find(|path| file_name(path) == wanted)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                id: id.to_string(),
                suffix: suffix.to_string(),
            })
    }
}

/// Store rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl FileStore for DirectoryStore {
    fn read_text(&self, path: &str) -> Result<String, StoreError> {
        let full = self.resolve(path);
        if !full.is_file() {
            return Err(StoreError::PathNotFound {
                path: path.to_string(),
            });
        }
        std::fs::read_to_string(&full).map_err(|source| StoreError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: path.to_string(),
                source,
            })?;
        }
        std::fs::write(&full, bytes).map_err(|source| StoreError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn find_by_id(&self, id: &str, suffix: &str) -> Result<String, StoreError> {
        let wanted = format!("{}{}", id, suffix);
        let mut matches: Vec<String> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.file_name().to_string_lossy() == wanted.as_str())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let segments: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(segments.join("/"))
            })
            .collect();
        matches.sort();
        matches.into_iter().next().ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
            suffix: suffix.to_string(),
        })
    }
}
