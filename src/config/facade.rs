//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::SyncConfig;
use crate::error::SyncError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the configuration of the project at `project_root`.
    pub fn load(project_root: &Path) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load(project_root).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate the configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load_from_file(path).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }
}

fn config_error(error: config::ConfigError) -> SyncError {
    SyncError::Config(error.to_string())
}
