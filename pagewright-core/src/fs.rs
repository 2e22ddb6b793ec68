//! Filesystem adapter used by the orchestrator and handlers.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Directory entries sorted by name
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    /// Read a file as text; failures are logged and reported as `None`
    async fn read(&self, path: &Path) -> Option<String>;

    /// Write a file, creating parent directories as needed
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Absolute form of a possibly relative path
    fn resolve(&self, path: &Path) -> PathBuf;

    async fn exists(&self, path: &Path) -> bool {
        self.read(path).await.is_some()
    }
}

/// Filesystem adapter over the local disk, rooted at the site directory
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Filesystem for LocalFs {
    async fn list(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let dir = self.resolve(dir);
        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path) -> Option<String> {
        let path = self.resolve(path);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Some(contents),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let path = self.resolve(path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }
}
