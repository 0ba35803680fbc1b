use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::enrich::HttpServiceConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub snapshots: SnapshotsConfig,
    #[serde(default)]
    pub pipeline: OrchestratorConfig,
    /// Caption service endpoint; without it the detector summary stands in
    /// for the scene caption.
    #[serde(default)]
    pub caption: Option<HttpServiceConfig>,
    /// Narrative service endpoint.
    #[serde(default)]
    pub narrative: Option<HttpServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            snapshots: SnapshotsConfig::default(),
            pipeline: OrchestratorConfig::default(),
            caption: None,
            narrative: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("helmwatch.db")
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotsConfig {
    #[serde(default = "default_snapshots_dir")]
    pub dir: PathBuf,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshots_dir(),
        }
    }
}

fn default_snapshots_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub snapshots: SnapshotsConfig,
    pub pipeline: OrchestratorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<SanitizedServiceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<SanitizedServiceConfig>,
}

/// Sanitized HTTP service config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServiceConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
}

impl From<&HttpServiceConfig> for SanitizedServiceConfig {
    fn from(config: &HttpServiceConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key_configured: config.api_key.as_ref().is_some_and(|k| !k.is_empty()),
            timeout_secs: config.timeout_secs,
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            snapshots: config.snapshots.clone(),
            pipeline: config.pipeline.clone(),
            caption: config.caption.as_ref().map(SanitizedServiceConfig::from),
            narrative: config.narrative.as_ref().map(SanitizedServiceConfig::from),
        }
    }
}
