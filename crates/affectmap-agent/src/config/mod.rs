//! Configuration loading for Affectmap.
//! Reads affectmap.toml from the current directory or path in AFFECTMAP_CONFIG env var.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_max_works")]
    pub max_works_per_researcher: usize,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_cache_flush_every")]
    pub cache_flush_every: usize,
    #[serde(default)]
    pub full_refresh: bool,
    #[serde(default)]
    pub skip_ai: bool,
    /// Restrict a run to researchers whose name contains this string.
    #[serde(default)]
    pub only: Option<String>,
}

fn default_worker_concurrency() -> usize { 4 }
fn default_max_works()          -> usize { 200 }
fn default_request_delay_ms()   -> u64   { 500 }
fn default_cache_flush_every()  -> usize { 5 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: default_worker_concurrency(),
            max_works_per_researcher: default_max_works(),
            request_delay_ms: default_request_delay_ms(),
            cache_flush_every: default_cache_flush_every(),
            full_refresh: false,
            skip_ai: false,
            only: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" | "openai" | "openai_compatible"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Falls back to AFFECTMAP_OPENAI_API_KEY / AFFECTMAP_COMPAT_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_backend()  -> String { "ollama".to_string() }
fn default_model()    -> String { "llama3:8b".to_string() }
fn default_base_url() -> String { "http://localhost:11434".to_string() }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_data_root")]
    pub data_root: String,
    /// Optional second tree kept in sync at every checkpoint.
    #[serde(default)]
    pub mirror_root: Option<String>,
}

fn default_data_root() -> String { "./data".to_string() }

impl Default for OutputConfig {
    fn default() -> Self {
        Self { data_root: default_data_root(), mirror_root: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default = "default_seed_path")]
    pub path: String,
}

fn default_seed_path() -> String { "./data/researchers.json".to_string() }

impl Default for SeedConfig {
    fn default() -> Self {
        Self { path: default_seed_path() }
    }
}

mod tests;

impl Config {
    /// Load configuration from affectmap.toml.
    /// Checks AFFECTMAP_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("AFFECTMAP_CONFIG")
            .unwrap_or_else(|_| "affectmap.toml".to_string());

        if !Path::new(&path).exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy affectmap.example.toml to affectmap.toml and edit it.",
                path
            );
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// API key for remote backends, with the env fallback applied.
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = &self.llm.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        let var = match self.llm.backend.as_str() {
            "openai" => "AFFECTMAP_OPENAI_API_KEY",
            "openai_compatible" => "AFFECTMAP_COMPAT_API_KEY",
            _ => return None,
        };
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}
