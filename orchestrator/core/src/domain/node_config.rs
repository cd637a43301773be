// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the YAML configuration shared by the three echo-cicd roles:
// - Coordination store endpoints and key namespace
// - Docker connection
// - Webhook server (bind address, queue capacity, allow-list, builders)
// - Registry push/pull credentials
// - Logging and metrics settings
//
// Every value has a default so a node can start without a file; CLI flags
// override whatever the file provides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "ECHO_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// etcd endpoints, e.g. "http://127.0.0.1:2379"
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Root of the key schema (`<namespace>/builds/...`)
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Path to Docker socket
    /// Default: auto-detect (DOCKER_HOST, then the platform socket)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Pushes buffered while a build runs; further pushes get 503
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// JSON allow-list of refs per repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_refs_file: Option<PathBuf>,

    #[serde(default = "default_builders_dir")]
    pub builders_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry built images are pushed to; unset keeps images local
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_registry: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_auth: Option<String>,

    /// Encoded registry auth per registry host, used by agents when pulling
    #[serde(default)]
    pub pull_auth: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_address")]
    pub bind_address: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_namespace() -> String {
    "echocicd".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:15342".to_string()
}

fn default_queue_capacity() -> usize {
    100
}

fn default_builders_dir() -> PathBuf {
    PathBuf::from("/builders")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { endpoints: default_endpoints(), namespace: default_namespace() }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            queue_capacity: default_queue_capacity(),
            allowed_refs_file: None,
            builders_dir: default_builders_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, bind_address: default_metrics_address() }
    }
}

impl EchoConfig {
    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Candidate files in discovery order
    pub fn discovery_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./echo-config.yaml"));
        paths.push(PathBuf::from("/etc/echo-cicd/config.yaml"));
        paths
    }

    /// Load the first configuration file that exists, or defaults if none does.
    ///
    /// An explicitly requested file must exist.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_yaml_file(path);
        }

        for path in Self::discovery_paths(None) {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Loading configuration");
                return Self::from_yaml_file(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.endpoints.is_empty() {
            return Err(ConfigError::Invalid("store.endpoints must not be empty".to_string()));
        }
        if self.store.namespace.is_empty() || self.store.namespace.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "store.namespace '{}' must be a single non-empty key segment",
                self.store.namespace
            )));
        }
        if self.webhook.queue_capacity == 0 {
            return Err(ConfigError::Invalid("webhook.queue_capacity must be at least 1".to_string()));
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::Invalid(format!("logging.format '{}' must be json or text", other))),
        }
    }
}
