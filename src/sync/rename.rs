//! Rename file
//!
//! Maps conflicting server ids to the names their files should get instead. New conflicts are
//! recorded with a placeholder value the operator replaces before the next pull.

use crate::error::SyncError;
use crate::fs::FileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const RENAME_PLACEHOLDER: &str = "insert node name";

/// What recording a conflict did to the rename file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictRecord {
    /// A placeholder entry was added.
    Added,
    /// An entry still holding the placeholder already exists.
    Pending,
    /// The operator's rename produced yet another conflict.
    RenameNotUnique,
}

#[derive(Debug, Clone, Default)]
pub struct RenameFile {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    used: BTreeSet<String>,
    conflicts: usize,
}

impl RenameFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Loads the rename file. A missing file is an empty one.
    pub async fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, SyncError> {
        let mut file = Self::new(path);
        if !fs.exists(path).await {
            debug!(path = %path.display(), "No rename file loaded");
            return Ok(file);
        }
        file.entries = crate::fs::read_json(fs, path).await?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The operator-supplied name for `id`. Placeholders do not count.
    pub fn lookup(&mut self, id: &str) -> Option<String> {
        let name = self.entries.get(id)?;
        if name == RENAME_PLACEHOLDER {
            return None;
        }
        self.used.insert(id.to_string());
        Some(name.clone())
    }

    /// Records a conflict for `id` without touching existing entries.
    pub fn record_conflict(&mut self, id: &str) -> ConflictRecord {
        self.conflicts += 1;
        match self.entries.get(id).map(String::as_str) {
            None => {
                self.entries
                    .insert(id.to_string(), RENAME_PLACEHOLDER.to_string());
                ConflictRecord::Added
            }
            Some(RENAME_PLACEHOLDER) => ConflictRecord::Pending,
            Some(_) => ConflictRecord::RenameNotUnique,
        }
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted JSON contents. `clean` keeps only the entries used during the run.
    pub fn contents(&self, clean: bool) -> Result<String, SyncError> {
        let entries: BTreeMap<&String, &String> = self
            .entries
            .iter()
            .filter(|(id, _)| !clean || self.used.contains(*id))
            .collect();
        let mut text = serde_json::to_string_pretty(&entries).map_err(|source| SyncError::Json {
            path: self.path.clone(),
            source,
        })?;
        text.push('\n');
        Ok(text)
    }

    /// Writes the file after a pull. Unused entries are dropped in clean mode, but only when the
    /// run found no conflicts.
    pub async fn save(&self, fs: &dyn FileSystem, clean: bool) -> Result<(), SyncError> {
        let clean = clean && self.conflicts == 0;
        if self.conflicts > 0 {
            error!(
                "Discovered {} node id conflicts, results are incomplete.\n - Resolve all conflicts inside '{}' and run 'atsync pull' again",
                self.conflicts,
                self.path.display()
            );
        }
        if clean {
            let removed = self.entries.len() - self.used.len();
            if removed > 0 {
                info!("Removed {} unused renames from rename configuration.", removed);
            }
        }
        if self.entries.is_empty() && !fs.exists(&self.path).await {
            return Ok(());
        }
        fs.write_file(&self.path, self.contents(clean)?.as_bytes()).await
    }
}
