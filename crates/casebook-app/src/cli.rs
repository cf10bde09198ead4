//! CLI argument definitions for the Casebook binary.
//!
//! Uses `clap` with derive macros. Priority resolution for globals:
//! CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Casebook - collect, caption, index, and search architectural case
/// studies.
#[derive(Parser, Debug)]
#[command(name = "casebook", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for ledgers, images, and the index.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect new case records and images from the content source.
    Collect {
        /// Upper bound on listing pages to enumerate.
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Caption every collected image that lacks a description.
    Enrich,
    /// Make the vector index ready: reuse a healthy index, restore it
    /// from the export snapshot, or (with --force) rebuild from scratch.
    Build {
        /// Delete the collection and re-embed every description.
        #[arg(long)]
        force: bool,
    },
    /// Free-text search over the index.
    Search {
        /// The query text.
        query: String,
        /// Number of case results to return.
        #[arg(short, long, default_value_t = 12)]
        k: usize,
    },
    /// Cases similar to the given case.
    Similar {
        /// The anchor case id.
        case_id: String,
        /// Number of case results to return.
        #[arg(short, long, default_value_t = 12)]
        k: usize,
    },
    /// List indexed cases without ranking.
    List {
        /// Maximum records to fetch before collapsing by case.
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
    /// Show per-stage progress counts.
    Status,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CASEBOOK_CONFIG env var > platform
    /// default (~/.casebook/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CASEBOOK_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory override, if any.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level override, if any.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".casebook").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".casebook").join("config.toml");
    }
    PathBuf::from("config.toml")
}
