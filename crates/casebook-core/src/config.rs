use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CasebookError, Result};

/// Top-level configuration for the Casebook pipeline and query engine.
///
/// Loaded from `~/.casebook/config.toml` by default. Each section
/// corresponds to one stage collaborator or cross-cutting concern; every
/// field has a default so a missing or partial file still works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasebookConfig {
    pub general: GeneralConfig,
    pub source: SourceConfig,
    pub caption: CaptionConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
}

impl Default for CasebookConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            source: SourceConfig::default(),
            caption: CaptionConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl CasebookConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CasebookConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not
    /// exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CasebookError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for ledgers, images, the index file, and the export.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.casebook/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Content-source connector settings.
///
/// The selector defaults target the case-archive site this system was
/// built for; they are configuration so a differently structured archive
/// only needs a config change, not a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Site root; relative links and image URLs are resolved against it.
    pub base_url: String,
    /// Listing path under the base URL. Page 2+ appends `?page=N`.
    pub listing_path: String,
    /// Upper bound on listing pages to enumerate per run.
    pub max_pages: u32,
    /// Pacing delay between HTTP requests, in milliseconds.
    pub page_delay_ms: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// CSS selector for detail-page links on a listing page.
    pub link_selector: String,
    /// CSS selector for the project name on a detail page.
    pub project_selector: String,
    /// CSS selector for the location on a detail page.
    pub location_selector: String,
    /// CSS selector for product names on a detail page.
    pub product_selector: String,
    /// CSS selector for gallery images on a detail page.
    pub image_selector: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.example-walls.co.jp".to_string(),
            listing_path: "/case/search/".to_string(),
            max_pages: 1000,
            page_delay_ms: 1000,
            request_timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            link_selector: "a[href*='/case/detail/']".to_string(),
            project_selector: "h4.c-label-row span.main".to_string(),
            location_selector: "h4.c-label-row span.sub".to_string(),
            product_selector: "div.info-area1 h5".to_string(),
            image_selector: "div.slider-for figure.slider-item img".to_string(),
        }
    }
}

/// Captioning-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Model identifier passed to the captioning API.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Fallback environment variable checked when the primary is unset.
    pub api_key_env_fallback: String,
    /// Pacing delay after each captioning call, in milliseconds. A policy
    /// for external throughput limits, not a correctness requirement.
    pub delay_ms: u64,
    /// Prompt template. `{project_name}`, `{products}`, and `{location}`
    /// are replaced with the case's metadata before the call.
    pub prompt_template: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-lite".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            api_key_env_fallback: "GEMINI_API_KEY".to_string(),
            delay_ms: 2000,
            prompt_template: "This image is an installation example from '{project_name}', \
                              using the products '{products}', located in '{location}'. \
                              With that context, describe the atmosphere, color scheme, \
                              design features, and usage scenes of this space in detail, \
                              and generate search keywords. Keep the facts accurate and \
                              the description evocative."
                .to_string(),
        }
    }
}

impl CaptionConfig {
    /// Resolve the captioning API key from the configured environment
    /// variables (primary, then fallback). Keys never live in the file.
    pub fn resolve_api_key(&self) -> Result<String> {
        api_key_from_env(&self.api_key_env, &self.api_key_env_fallback)
    }
}

/// Embedding-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier passed to the embedding API.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Fallback environment variable checked when the primary is unset.
    pub api_key_env_fallback: String,
    /// Maximum attempts for one embedding request (1 = no retry).
    pub max_retries: u32,
    /// Base backoff between retries, in milliseconds; doubles per attempt.
    pub retry_base_ms: u64,
    /// Per-request timeout, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "gemini-embedding-001".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            api_key_env_fallback: "GEMINI_API_KEY".to_string(),
            max_retries: 4,
            retry_base_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the embedding API key from the configured environment
    /// variables (primary, then fallback).
    pub fn resolve_api_key(&self) -> Result<String> {
        api_key_from_env(&self.api_key_env, &self.api_key_env_fallback)
    }
}

fn api_key_from_env(primary: &str, fallback: &str) -> Result<String> {
    std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .map_err(|_| {
            CasebookError::Config(format!(
                "set the {} or {} environment variable",
                primary, fallback
            ))
        })
}

/// Vector-index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index store file name under the data directory.
    pub index_file: String,
    /// Export snapshot file name under the data directory.
    pub export_file: String,
    /// Raw-record ledger file name under the data directory.
    pub raw_ledger: String,
    /// Enriched-record ledger file name under the data directory.
    pub enriched_ledger: String,
    /// Batch size for the restore-from-export path.
    pub restore_batch_size: usize,
    /// Neighbor over-fetch multiplier applied before per-case collapsing.
    pub overfetch_factor: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_file: "index.json".to_string(),
            export_file: "export.json".to_string(),
            raw_ledger: "raw_data.json".to_string(),
            enriched_ledger: "enriched_data.json".to_string(),
            restore_batch_size: 100,
            overfetch_factor: 5,
        }
    }
}
