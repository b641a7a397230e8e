//! File system access
//!
//! Browsers and writers only talk to `FileSystem`, so tests can run against a scratch
//! directory and runs never block the async runtime on disk I/O.

use crate::error::SyncError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn stat(&self, path: &Path) -> Result<EntryKind, SyncError>;

    /// Entry names of a directory, sorted.
    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, SyncError>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, SyncError>;

    /// Writes `contents`, creating parent directories as needed.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SyncError>;

    async fn exists(&self, path: &Path) -> bool {
        self.stat(path).await.is_ok()
    }

    async fn read_text(&self, path: &Path) -> Result<String, SyncError> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|e| {
            SyncError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }
}

pub async fn read_json<T: DeserializeOwned>(fs: &dyn FileSystem, path: &Path) -> Result<T, SyncError> {
    let bytes = fs.read_file(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| SyncError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// `FileSystem` backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &Path) -> Result<EntryKind, SyncError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        Ok(if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        })
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>, SyncError> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| SyncError::io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SyncError::io(path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, SyncError> {
        tokio::fs::read(path).await.map_err(|e| SyncError::io(path, e))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SyncError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| SyncError::io(path, e))
    }
}

/// Joins file name segments onto a base directory.
pub fn join_segments(base: &Path, segments: &[String]) -> PathBuf {
    segments.iter().fold(base.to_path_buf(), |path, s| path.join(s))
}
