//! Configuration and persistence
//!
//! Settings come from `config.toml` under the user config directory (or an
//! explicit path). Instance tokens are never stored in the file: each instance
//! names the environment variable holding its token, and `.env` is loaded
//! before lookup.

pub mod repository;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::{HttpContentApi, ResilienceConfig};
use crate::sync::fingerprint::SimilarityConfig;
use crate::sync::loader::{
    DEFAULT_COMPONENT_DEPTH, DEFAULT_FETCH_CONCURRENCY, DEFAULT_FINGERPRINT_CONCURRENCY,
    LoaderConfig,
};
use crate::sync::merge::DEFAULT_MERGE_PARALLELISM;

const APP_DIR: &str = "content-sync";

/// Connection details of one content instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub url: String,
    /// Environment variable holding the API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl InstanceConfig {
    pub fn token(&self) -> Result<Option<String>> {
        match &self.token_env {
            Some(var) => std::env::var(var)
                .map(Some)
                .with_context(|| format!("Environment variable {} is not set", var)),
            None => Ok(None),
        }
    }
}

/// Tuning of the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub component_depth: usize,
    pub fetch_concurrency: usize,
    pub fingerprint_concurrency: usize,
    pub merge_parallelism: usize,
    pub hamming_threshold: u32,
    pub size_tolerance: f64,
    pub name_similarity: f64,
    pub retry_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let similarity = SimilarityConfig::default();
        Self {
            component_depth: DEFAULT_COMPONENT_DEPTH,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fingerprint_concurrency: DEFAULT_FINGERPRINT_CONCURRENCY,
            merge_parallelism: DEFAULT_MERGE_PARALLELISM,
            hamming_threshold: similarity.hamming_threshold,
            size_tolerance: similarity.size_tolerance,
            name_similarity: similarity.name_similarity,
            retry_attempts: 3,
        }
    }
}

impl SyncSettings {
    pub fn loader(&self) -> LoaderConfig {
        LoaderConfig {
            max_depth: self.component_depth,
            fetch_concurrency: self.fetch_concurrency.max(1),
            fingerprint_concurrency: self.fingerprint_concurrency.clamp(1, 16),
            fingerprint_media: true,
        }
    }

    pub fn similarity(&self) -> SimilarityConfig {
        SimilarityConfig {
            hamming_threshold: self.hamming_threshold,
            size_tolerance: self.size_tolerance,
            name_similarity: self.name_similarity,
        }
    }

    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig::new(self.retry_attempts, self.fetch_concurrency)
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    /// Database file; defaults to the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Load from `path`, or from the default location; a missing default file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }

    pub fn instance(&self, name: &str) -> Result<&InstanceConfig> {
        self.instances.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.instances.keys().map(String::as_str).collect();
            anyhow!(
                "Unknown instance '{}' (configured: {})",
                name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            )
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("content-sync.db")
        })
    }

    /// HTTP client for a configured instance
    pub fn client(&self, name: &str) -> Result<HttpContentApi> {
        let instance = self.instance(name)?;
        HttpContentApi::new(
            name,
            &instance.url,
            instance.token()?,
            Duration::from_secs(instance.timeout_secs),
            &self.sync.resilience(),
        )
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

/// Loaded settings plus an open database
pub struct Config {
    pub settings: Settings,
    pub pool: SqlitePool,
}

impl Config {
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            log::trace!("No .env loaded: {}", e);
        }
        let settings = Settings::load(path)?;
        let pool = repository::connect(&settings.database_path()).await?;
        Ok(Self { settings, pool })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_defaults() {
        let settings = Settings::parse(
            r#"
            [instances.staging]
            url = "https://staging.example.com"
            token_env = "STAGING_TOKEN"

            [instances.production]
            url = "https://example.com"
            timeout_secs = 60

            [sync]
            merge_parallelism = 2
            "#,
        )
        .unwrap();

        assert_eq!(settings.instances.len(), 2);
        assert_eq!(settings.instance("staging").unwrap().timeout_secs, 30);
        assert_eq!(settings.instance("production").unwrap().timeout_secs, 60);
        assert_eq!(settings.sync.merge_parallelism, 2);
        assert_eq!(settings.sync.component_depth, 10);
        assert_eq!(settings.sync.similarity(), SimilarityConfig::default());
    }

    #[test]
    fn test_unknown_instance_lists_known_ones() {
        let settings = Settings::parse("[instances.staging]\nurl = \"http://localhost\"\n").unwrap();
        let err = settings.instance("prod").unwrap_err().to_string();
        assert!(err.contains("staging"));
    }

    #[test]
    fn test_token_from_environment() {
        let instance = InstanceConfig {
            url: "http://localhost".to_string(),
            token_env: Some("CONTENT_SYNC_TEST_TOKEN_UNSET".to_string()),
            timeout_secs: 5,
        };
        assert!(instance.token().is_err());

        let anonymous = InstanceConfig {
            token_env: None,
            ..instance
        };
        assert_eq!(anonymous.token().unwrap(), None);
    }

    #[test]
    fn test_loader_settings_are_clamped() {
        let settings = SyncSettings {
            fingerprint_concurrency: 64,
            fetch_concurrency: 0,
            ..Default::default()
        };
        let loader = settings.loader();
        assert_eq!(loader.fingerprint_concurrency, 16);
        assert_eq!(loader.fetch_concurrency, 1);
    }
}
