//! Pull, push and scan runs
//!
//! Each run wires the configuration, a browser and a handler together: pulls browse the server
//! and write files, pushes browse the source directory and write to the server.

pub mod pull;
pub mod push;
pub mod rename;
pub mod scan;
pub mod writer;

pub use pull::{run_pull, PullHandler, PullOptions, PullReport};
pub use push::{run_push, PushHandler, PushOutcome, PushReport, PushStats, WriteCoordinator};
pub use rename::{RenameFile, RENAME_PLACEHOLDER};
pub use scan::{run_scan, ScanReport};
pub use writer::{NodeWriter, WriteOutcome, WriteStats};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fs::FileSystem;
use crate::transform::{Direction, TransformContext};
use std::sync::Arc;

/// The transform context for a run in `direction`.
pub(crate) fn transform_context(
    config: &SyncConfig,
    direction: Direction,
    fs: Arc<dyn FileSystem>,
) -> Result<TransformContext, SyncError> {
    let mut context = TransformContext::new(direction, fs);
    context.server_version = config.server_version()?;
    context.xml = config.xml_options();
    Ok(context)
}
