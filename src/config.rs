//! Configuration for stackctl.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STACKCTL_ENDPOINT, STACKCTL_TOKEN, STACKCTL_HOME)
//! 2. Config file (.stackctl/config.yaml, then $STACKCTL_HOME/config.yaml)
//! 3. Defaults (~/.stackctl, built-in polling intervals)
//!
//! Config file discovery:
//! - Searches current directory and parents for .stackctl/config.yaml
//! - Falls back to config.yaml inside the home directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{DeploySettings, ReviewSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,

    /// Base URL of the stack service
    pub endpoint: Option<String>,

    /// Bearer token for the stack service
    pub token: Option<String>,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollingConfig {
    pub event_interval_seconds: Option<u64>,
    pub status_interval_seconds: Option<u64>,
    pub change_set_interval_seconds: Option<u64>,
    pub change_set_timeout_seconds: Option<u64>,
    pub deploy_timeout_seconds: Option<u64>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the stackctl home directory
    pub home: PathBuf,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub polling: PollingSettings,
}

/// Polling intervals and timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    pub event_interval_seconds: u64,
    pub status_interval_seconds: u64,
    pub change_set_interval_seconds: u64,
    pub change_set_timeout_seconds: u64,
    pub deploy_timeout_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            event_interval_seconds: 3,
            status_interval_seconds: 5,
            change_set_interval_seconds: 2,
            change_set_timeout_seconds: 600,
            deploy_timeout_seconds: 3600,
        }
    }
}

impl PollingSettings {
    fn merge(config: &PollingConfig) -> Self {
        let defaults = Self::default();
        Self {
            event_interval_seconds: config
                .event_interval_seconds
                .unwrap_or(defaults.event_interval_seconds),
            status_interval_seconds: config
                .status_interval_seconds
                .unwrap_or(defaults.status_interval_seconds),
            change_set_interval_seconds: config
                .change_set_interval_seconds
                .unwrap_or(defaults.change_set_interval_seconds),
            change_set_timeout_seconds: config
                .change_set_timeout_seconds
                .unwrap_or(defaults.change_set_timeout_seconds),
            deploy_timeout_seconds: config
                .deploy_timeout_seconds
                .unwrap_or(defaults.deploy_timeout_seconds),
        }
    }

    /// Deployer timing built from these settings
    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            event_poll_interval: Duration::from_secs(self.event_interval_seconds),
            status_poll_interval: Duration::from_secs(self.status_interval_seconds),
            review: ReviewSettings {
                poll_interval: Duration::from_secs(self.change_set_interval_seconds),
                timeout: Duration::from_secs(self.change_set_timeout_seconds),
            },
            deploy_timeout: Duration::from_secs(self.deploy_timeout_seconds),
        }
    }
}

/// Find a project config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".stackctl").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge a parsed config file with environment overrides
fn resolve(
    home: PathBuf,
    file: ConfigFile,
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    ResolvedConfig {
        home,
        endpoint: non_empty(env("STACKCTL_ENDPOINT")).or(non_empty(file.endpoint)),
        token: non_empty(env("STACKCTL_TOKEN")).or(non_empty(file.token)),
        config_file,
        polling: PollingSettings::merge(&file.polling),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let home = match std::env::var("STACKCTL_HOME") {
        Ok(home) => PathBuf::from(home),
        Err(_) => dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".stackctl"),
    };

    let config_file = find_config_file().or_else(|| {
        let fallback = home.join("config.yaml");
        fallback.exists().then_some(fallback)
    });

    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(home, file, config_file, |key| std::env::var(key).ok()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the configured service endpoint
pub fn endpoint() -> Result<String> {
    config()?.endpoint.clone().context(
        "No stack service endpoint configured (set STACKCTL_ENDPOINT or `endpoint` in .stackctl/config.yaml)",
    )
}

/// Get the configured bearer token, if any
pub fn token() -> Result<Option<String>> {
    Ok(config()?.token.clone())
}

/// Get deployer timing from the polling settings
pub fn deploy_settings() -> Result<DeploySettings> {
    Ok(config()?.polling.deploy_settings())
}
