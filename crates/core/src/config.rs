//! # Engine Configuration
//!
//! Persisted at `.prism/config.json`. A missing file means defaults;
//! partial files fill the remaining fields from defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::Provider;
use crate::topology::{ArenaConfig, ChainConfig, RefineConfig};

/// Default config location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = ".prism/config.json";

/// Configuration for the orchestration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// HTTP client timeout for a single provider call
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Output token cap sent with every request
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Per-provider API root overrides (proxies, self-hosted gateways)
    #[serde(default)]
    pub base_urls: HashMap<Provider, String>,
    /// Per-provider default model overrides
    #[serde(default)]
    pub models: HashMap<Provider, String>,
    /// Chain stage bindings
    #[serde(default)]
    pub chain: ChainConfig,
    /// Default arena contenders
    #[serde(default)]
    pub arena: ArenaConfig,
    /// Default refine bindings and focus
    #[serde(default)]
    pub refine: RefineConfig,
    /// SQLite file for user-set credentials (in-memory when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_db: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_timeout_secs(),
            max_output_tokens: default_max_output_tokens(),
            base_urls: HashMap::new(),
            models: HashMap::new(),
            chain: ChainConfig::default(),
            arena: ArenaConfig::default(),
            refine: RefineConfig::default(),
            credentials_db: None,
        }
    }
}

impl EngineConfig {
    /// Load from `.prism/config.json`
    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific path; a missing file yields defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Save as pretty JSON, creating the parent directory
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    /// Overlay per-provider maps and the credentials path from `other`.
    ///
    /// Topology bindings are replaced wholesale.
    pub fn merge(&mut self, other: EngineConfig) {
        self.request_timeout_secs = other.request_timeout_secs;
        self.max_output_tokens = other.max_output_tokens;
        self.base_urls.extend(other.base_urls);
        self.models.extend(other.models);
        self.chain = other.chain;
        self.arena = other.arena;
        self.refine = other.refine;
        if other.credentials_db.is_some() {
            self.credentials_db = other.credentials_db;
        }
    }
}
