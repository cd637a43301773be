// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the echo-cicd CLI

pub mod agent;
pub mod build;
pub mod webhook;

pub use self::agent::AgentArgs;
pub use self::build::BuildArgs;
pub use self::webhook::WebhookArgs;

use anyhow::{Context, Result};
use clap::Args;
use echo_core::application::BuildEventStore;
use echo_core::domain::node_config::EchoConfig;
use echo_core::infrastructure::{DockerEngine, EtcdCoordinationStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Options shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "ECHO_CONFIG_PATH", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// etcd endpoints to read and write builds (comma separated)
    #[arg(long, global = true, env = "ETCD_ENDPOINTS", value_delimiter = ',')]
    pub etcd_endpoints: Vec<String>,

    /// Key namespace in the coordination store
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// The directory to operate in
    #[arg(long, global = true, default_value = ".")]
    pub working_dir: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ECHO_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_parser = ["text", "json"])]
    pub log_format: Option<String>,
}

impl GlobalArgs {
    /// Overlay command-line values on a loaded configuration
    pub fn apply(&self, config: &mut EchoConfig) {
        if !self.etcd_endpoints.is_empty() {
            config.store.endpoints = self.etcd_endpoints.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.store.namespace = namespace.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
    }

    pub fn load_config(&self) -> Result<EchoConfig> {
        let mut config =
            EchoConfig::load_or_default(self.config.as_deref()).context("Failed to load configuration")?;
        self.apply(&mut config);
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }
}

pub(crate) async fn connect_events(config: &EchoConfig) -> Result<Arc<BuildEventStore>> {
    let store = EtcdCoordinationStore::connect(&config.store.endpoints)
        .await
        .context("could not connect to etcd server")?;
    Ok(Arc::new(BuildEventStore::new(Arc::new(store), config.store.namespace.clone())))
}

pub(crate) async fn connect_docker(config: &EchoConfig) -> Result<Arc<DockerEngine>> {
    let engine = DockerEngine::new(config.docker.socket_path.clone()).context("could not connect to docker host")?;
    engine.healthcheck().await.context("docker host is not responding")?;
    Ok(Arc::new(engine))
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Parse a `KEY=VALUE` pair
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let mut config = EchoConfig::default();
        let args = GlobalArgs {
            etcd_endpoints: vec!["http://etcd-a:2379".into(), "http://etcd-b:2379".into()],
            namespace: Some("staging".into()),
            debug: true,
            log_level: Some("warn".into()),
            log_format: Some("json".into()),
            ..Default::default()
        };

        args.apply(&mut config);

        assert_eq!(config.store.endpoints.len(), 2);
        assert_eq!(config.store.namespace, "staging");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let mut config = EchoConfig::default();
        config.store.namespace = "prod".into();

        GlobalArgs::default().apply(&mut config);

        assert_eq!(config.store.namespace, "prod");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_overlays_flags_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo-config.yaml");
        std::fs::write(
            &path,
            "store:\n  endpoints: [\"http://etcd:2379\"]\n  namespace: fleet\nwebhook:\n  queue_capacity: 5\n",
        )
        .unwrap();

        let args = GlobalArgs {
            config: Some(path),
            namespace: Some("fleet-b".into()),
            ..Default::default()
        };
        let config = args.load_config().unwrap();

        assert_eq!(config.store.endpoints, vec!["http://etcd:2379"]);
        assert_eq!(config.store.namespace, "fleet-b");
        assert_eq!(config.webhook.queue_capacity, 5);
    }

    #[test]
    fn test_load_config_rejects_missing_explicit_file() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/nonexistent/echo-config.yaml")),
            ..Default::default()
        };
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("registry.local=c2VjcmV0=").unwrap(),
            ("registry.local".to_string(), "c2VjcmV0=".to_string())
        );
        assert!(parse_key_val("no-separator").is_err());
        assert!(parse_key_val("=value").is_err());
    }
}
