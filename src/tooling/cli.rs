//! CLI Tooling
//!
//! Offline commands for a project directory. Pull and push need a server transport and are
//! driven through the library API (`sync::run_pull`, `sync::run_push`).

use crate::config::{ConfigLoader, SyncConfig};
use crate::error::SyncError;
use crate::fs::LocalFileSystem;
use crate::sync::run_scan;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// atsync - synchronize an atvise server with a source directory
#[derive(Parser)]
#[command(name = "atsync")]
#[command(about = "Bidirectional synchronization between an OPC-UA node tree and a source directory")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root directory
    #[arg(long, default_value = ".")]
    pub project: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the nodes a push would write, in push order, without contacting the server
    Scan {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration
    Config,
}

/// Loaded configuration for one invocation.
pub struct CliContext {
    project: PathBuf,
    config: SyncConfig,
}

impl CliContext {
    pub fn new(project: PathBuf, config_path: Option<PathBuf>) -> Result<Self, SyncError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(&path)?,
            None => ConfigLoader::load(&project)?,
        };
        Ok(Self { project, config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Applies `--log-level` and `--log-format`.
    pub fn apply_log_overrides(&mut self, level: Option<&str>, format: Option<&str>) {
        if let Some(level) = level {
            self.config.logging.level = level.to_string();
        }
        if let Some(format) = format {
            self.config.logging.format = format.to_string();
        }
    }

    pub async fn execute(&self, command: &Commands) -> Result<String, SyncError> {
        match command {
            Commands::Scan { format } => self.scan(format).await,
            Commands::Config => toml::to_string_pretty(&self.config)
                .map_err(|e| SyncError::Config(format!("Failed to render configuration: {}", e))),
        }
    }

    async fn scan(&self, format: &str) -> Result<String, SyncError> {
        let mut config = self.config.clone();
        if config.source_dir.is_relative() {
            config.source_dir = self.project.join(&config.source_dir);
        }
        let report = run_scan(&config, Arc::new(LocalFileSystem::new())).await?;

        match format {
            "json" => {
                let failures: Vec<_> = report
                    .failures
                    .iter()
                    .map(|f| json!({ "node_id": f.node_id, "message": f.message }))
                    .collect();
                serde_json::to_string_pretty(&json!({
                    "nodes": report.node_ids,
                    "failures": failures,
                }))
                .map_err(|e| SyncError::Config(e.to_string()))
            }
            "text" => {
                let mut output = report.node_ids.join("\n");
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&format!("{} node(s)", report.node_ids.len()));
                for failure in &report.failures {
                    output.push_str(&format!("\nFAILURE: {}: {}", failure.node_id, failure.message));
                }
                Ok(output)
            }
            other => Err(SyncError::Config(format!(
                "Invalid format: {} (must be 'text' or 'json')",
                other
            ))),
        }
    }
}
