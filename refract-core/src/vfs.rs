//! The filesystem capability the analyzer is parameterized over: a
//! sandboxed on-disk implementation for the server, and an in-memory one
//! for tests.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::workspace::WorkspaceGlobs;

/// Read-side I/O failures, surfaced as values so downstream computes can
/// turn them into tombs.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum VfsError {
    #[error("file not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("path is outside the workspace")]
    OutsideWorkspace,
    #[error("no workspace folder is open")]
    SingleFile,
    #[error("{0}")]
    Unknown(String),
}

impl VfsError {
    fn from_io(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => VfsError::NotFound,
            io::ErrorKind::PermissionDenied => VfsError::PermissionDenied,
            _ => VfsError::Unknown(error.to_string()),
        }
    }
}

/// Read and discovery access to workspace files.
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Reads the contents of `uri`.
    async fn read_file(&self, uri: &Url) -> Result<String, VfsError>;

    /// Finds root documents under `folder`: files matching the root and
    /// discovery globs and not matching the ignore glob.
    async fn glob(&self, folder: &Url, globs: &WorkspaceGlobs) -> Result<Vec<Url>, VfsError>;
}

/// The on-disk implementation, sandboxed to the workspace folders.
pub struct OsVfs {
    folders: Vec<PathBuf>,
}

impl OsVfs {
    pub fn new(folders: impl IntoIterator<Item = Url>) -> Self {
        Self {
            folders: folders
                .into_iter()
                .filter_map(|f| f.to_file_path().ok())
                .collect(),
        }
    }

    fn check_sandbox(&self, path: &Path) -> Result<(), VfsError> {
        if self.folders.is_empty() {
            return Err(VfsError::SingleFile);
        }
        if self.folders.iter().any(|folder| path.starts_with(folder)) {
            Ok(())
        } else {
            Err(VfsError::OutsideWorkspace)
        }
    }
}

#[async_trait]
impl Vfs for OsVfs {
    async fn read_file(&self, uri: &Url) -> Result<String, VfsError> {
        if uri.scheme() != "file" {
            return Err(VfsError::Unknown(format!(
                "unsupported scheme {:?}",
                uri.scheme()
            )));
        }
        let path = uri
            .to_file_path()
            .map_err(|_| VfsError::Unknown(format!("not a file path: {uri}")))?;
        self.check_sandbox(&path)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| VfsError::from_io(&e))
    }

    async fn glob(&self, folder: &Url, globs: &WorkspaceGlobs) -> Result<Vec<Url>, VfsError> {
        let root = folder
            .to_file_path()
            .map_err(|_| VfsError::Unknown(format!("not a file path: {folder}")))?;
        let globs = globs.clone();
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let walker = walkdir::WalkDir::new(&root).into_iter();
            let walker = walker.filter_entry(|entry| {
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    return true;
                };
                // Prune ignored directories so e.g. node_modules is never
                // walked at all.
                !(entry.file_type().is_dir() && globs.ignore.is_match(relative))
            });
            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                if globs.roots.is_match(relative)
                    && globs.discover.is_match(relative)
                    && !globs.ignore.is_match(relative)
                    && let Ok(uri) = Url::from_file_path(entry.path())
                {
                    matches.push(uri);
                }
            }
            matches.sort();
            matches
        })
        .await
        .map_err(|e| VfsError::Unknown(e.to_string()))?;
        Ok(matches)
    }
}

/// An in-memory implementation for tests and fixtures.
#[derive(Default)]
pub struct MemoryVfs {
    files: Mutex<BTreeMap<Url, String>>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: Url, contents: impl Into<String>) {
        self.files.lock().unwrap().insert(uri, contents.into());
    }

    pub fn remove(&self, uri: &Url) {
        self.files.lock().unwrap().remove(uri);
    }
}

#[async_trait]
impl Vfs for MemoryVfs {
    async fn read_file(&self, uri: &Url) -> Result<String, VfsError> {
        self.files
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or(VfsError::NotFound)
    }

    async fn glob(&self, folder: &Url, globs: &WorkspaceGlobs) -> Result<Vec<Url>, VfsError> {
        let files = self.files.lock().unwrap();
        let mut matches = Vec::new();
        for uri in files.keys() {
            let Some(relative) = uri.as_str().strip_prefix(folder.as_str()) else {
                continue;
            };
            let relative = Path::new(relative.trim_start_matches('/'));
            if globs.roots.is_match(relative)
                && globs.discover.is_match(relative)
                && !globs.ignore.is_match(relative)
            {
                matches.push(uri.clone());
            }
        }
        Ok(matches)
    }
}
