// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Identity Service Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Storage backend for the User/Team/Organization aggregates
// - Event topics and the outbound publish queue
// - Operation deadlines and optimistic-update retry budget
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::events::DEFAULT_EVENT_SOURCE;
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "IdentityConfig";
pub const CONFIG_PATH_ENV: &str = "AEGIS_IDENTITY_CONFIG_PATH";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "IdentityConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: IdentityConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigSpec {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub operations: OperationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Required when backend is `postgres`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// `source` tag of outbound envelopes
    #[serde(default = "default_source")]
    pub source: String,

    /// Topic for user and organization events
    #[serde(default = "default_user_topic")]
    pub user_topic: String,

    /// Topic for team events
    #[serde(default = "default_team_topic")]
    pub team_topic: String,

    /// Inbound topic carrying upstream identity events
    #[serde(default = "default_auth_topic")]
    pub auth_topic: String,

    /// Bound of the outbound queue; events beyond it are dropped
    #[serde(default = "default_queue_capacity")]
    pub publish_queue_capacity: usize,

    /// Per-topic buffer of the in-process bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    /// Deadline applied when the caller does not supply one
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts for a version-checked group write before giving up
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,
}

impl OperationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_max_connections() -> u32 {
    10
}

fn default_source() -> String {
    DEFAULT_EVENT_SOURCE.to_string()
}

fn default_user_topic() -> String {
    "user.events".to_string()
}

fn default_team_topic() -> String {
    "team.events".to_string()
}

fn default_auth_topic() -> String {
    "auth.events".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_bus_capacity() -> usize {
    1000
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_update_attempts() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::InMemory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            user_topic: default_user_topic(),
            team_topic: default_team_topic(),
            auth_topic: default_auth_topic(),
            publish_queue_capacity: default_queue_capacity(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_update_attempts: default_max_update_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for IdentityConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "aegis-identity".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: IdentityConfigSpec::default(),
        }
    }
}

impl IdentityConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_IDENTITY_CONFIG_PATH environment variable
    /// 2. ./aegis-identity.yaml (working directory)
    /// 3. ~/.aegis/identity.yaml (user home)
    /// 4. /etc/aegis/identity.yaml (system, Unix) or C:\ProgramData\Aegis\identity.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        Self::discovery_paths().into_iter().find(|p| p.exists())
    }

    /// Candidate paths in precedence order, whether or not they exist.
    pub fn discovery_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./aegis-identity.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".aegis").join("identity.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/aegis/identity.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Aegis\\identity.yaml"));
        paths
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("AEGIS_IDENTITY_DATABASE_URL") {
            tracing::info!("Environment override: AEGIS_IDENTITY_DATABASE_URL");
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }

        if let Some(level) = lookup("AEGIS_IDENTITY_LOG_LEVEL") {
            tracing::info!("Environment override: AEGIS_IDENTITY_LOG_LEVEL={}", level);
            self.spec.logging.level = level;
        }

        if let Some(val) = lookup("AEGIS_IDENTITY_MAX_UPDATE_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(attempts) => {
                    tracing::info!("Environment override: AEGIS_IDENTITY_MAX_UPDATE_ATTEMPTS={}", attempts);
                    self.spec.operations.max_update_attempts = attempts;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for AEGIS_IDENTITY_MAX_UPDATE_ATTEMPTS: '{}'. Expected a positive integer. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let storage = &self.spec.storage;
        if storage.backend == StorageBackendKind::Postgres
            && storage.database_url.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        let events = &self.spec.events;
        for (field, topic) in [
            ("user_topic", &events.user_topic),
            ("team_topic", &events.team_topic),
            ("auth_topic", &events.auth_topic),
        ] {
            if topic.is_empty() {
                anyhow::bail!("spec.events.{} cannot be empty", field);
            }
        }
        if events.source.is_empty() {
            anyhow::bail!("spec.events.source cannot be empty");
        }
        if events.publish_queue_capacity == 0 {
            anyhow::bail!("spec.events.publish_queue_capacity must be greater than zero");
        }
        if events.bus_capacity == 0 {
            anyhow::bail!("spec.events.bus_capacity must be greater than zero");
        }

        if self.spec.operations.timeout_ms == 0 {
            anyhow::bail!("spec.operations.timeout_ms must be greater than zero");
        }
        if self.spec.operations.max_update_attempts == 0 {
            anyhow::bail!("spec.operations.max_update_attempts must be at least 1");
        }

        Ok(())
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match self.spec.storage.backend {
            StorageBackendKind::InMemory => StorageBackend::InMemory,
            StorageBackendKind::Postgres => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: self.spec.storage.database_url.clone().unwrap_or_default(),
                max_connections: self.spec.storage.max_connections,
            }),
        }
    }
}
