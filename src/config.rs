//! TOML configuration for the market-research pipeline.
//!
//! Every section is optional; missing values fall back to the defaults the
//! registry integration was tuned with (10 items per page, 100 ms between
//! pages, 3 concurrent downloads, 20 staging slots per kind).
//!
//! ```toml
//! [registry]
//! search_url = "https://pncp.gov.br/api/search/"
//! page_size = 10
//!
//! [embedding]
//! models = ["paraphrase-multilingual-minilm-l12-v2", "all-minilm-l6-v2"]
//!
//! [download]
//! dir = "app/temp/docs/downloads_pncp"
//! workers = 3
//!
//! [staging]
//! dir = "app/temp/docs/similares"
//!
//! [research]
//! max_documents = 300
//! top_k = 10
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding;
use crate::models::Ordering;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}

/// Endpoints and paging behaviour of the procurement registry.
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Search endpoint queried page by page.
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Public site host, prefixed to item-relative view paths.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Base of the per-document download endpoints.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    /// Value of the `status` filter sent with every search.
    #[serde(default = "default_status")]
    pub status: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            site_url: default_site_url(),
            api_url: default_api_url(),
            page_size: default_page_size(),
            page_delay_ms: default_page_delay_ms(),
            timeout_secs: default_search_timeout_secs(),
            status: default_status(),
        }
    }
}

fn default_search_url() -> String {
    "https://pncp.gov.br/api/search/".to_string()
}
fn default_site_url() -> String {
    "https://pncp.gov.br".to_string()
}
fn default_api_url() -> String {
    "https://pncp.gov.br/pncp-api/v1".to_string()
}
fn default_page_size() -> usize {
    10
}
fn default_page_delay_ms() -> u64 {
    100
}
fn default_search_timeout_secs() -> u64 {
    30
}
fn default_status() -> String {
    "vigente".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Ordered preference list; the first model that loads is used.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
            batch_size: default_batch_size(),
            show_download_progress: false,
        }
    }
}

fn default_models() -> Vec<String> {
    vec![
        "paraphrase-multilingual-minilm-l12-v2".to_string(),
        "multilingual-e5-small".to_string(),
        "all-minilm-l6-v2".to_string(),
    ]
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
            workers: default_workers(),
            timeout_secs: default_download_timeout_secs(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_workers() -> usize {
    3
}
fn default_download_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
    /// Highest slot number cleared before each run, per kind.
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,
    /// How many staged files the downstream extraction step reads.
    #[serde(default = "default_consume_limit")]
    pub consume_limit: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            max_slots: default_max_slots(),
            consume_limit: default_consume_limit(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}
fn default_max_slots() -> usize {
    20
}
fn default_consume_limit() -> usize {
    5
}

/// Defaults applied to research requests that leave a value unset.
#[derive(Debug, Deserialize, Clone)]
pub struct ResearchConfig {
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub ordering: Ordering,
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_documents: default_max_documents(),
            top_k: default_top_k(),
            ordering: Ordering::default(),
            cleanup: default_cleanup(),
        }
    }
}

fn default_max_documents() -> usize {
    300
}
fn default_top_k() -> usize {
    10
}
fn default_cleanup() -> bool {
    true
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.page_size == 0 {
            bail!("registry.page_size must be > 0");
        }
        if self.download.workers == 0 {
            bail!("download.workers must be > 0");
        }
        if self.staging.max_slots == 0 {
            bail!("staging.max_slots must be > 0");
        }
        if self.research.top_k == 0 {
            bail!("research.top_k must be > 0");
        }
        if self.embedding.models.is_empty() {
            bail!("embedding.models must list at least one model");
        }
        if let Some(unknown) = self
            .embedding
            .models
            .iter()
            .find(|m| !embedding::is_supported_model(m))
        {
            bail!(
                "Unknown embedding model: '{}'. Supported models: {}",
                unknown,
                embedding::SUPPORTED_MODELS.join(", ")
            );
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
