// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Args;
use echo_core::application::BuildService;
use echo_core::domain::deploy_config::{DeployConfig, DEFAULT_CONFIG_FILE};
use echo_core::domain::node_config::EchoConfig;
use echo_core::infrastructure::GitSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use super::{connect_docker, connect_events};

/// Trigger a build in the working directory
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Encoded credentials passed to the registry push
    #[arg(long, env = "PUSH_AUTH", hide_env_values = true)]
    pub push_auth: Option<String>,

    /// Registry the image is pushed to; local-only when omitted
    #[arg(long)]
    pub registry: Option<String>,

    /// Docker socket path (defaults to auto-detection)
    #[arg(long)]
    pub docker_socket: Option<String>,

    /// Folder holding the builders
    #[arg(long)]
    pub builder_dir: Option<PathBuf>,

    /// Deploy config file, relative to the working directory
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub deploy_config: PathBuf,
}

pub async fn execute(args: BuildArgs, working_dir: &Path, mut config: EchoConfig) -> Result<()> {
    if args.docker_socket.is_some() {
        config.docker.socket_path = args.docker_socket.clone();
    }

    let config_path = working_dir.join(&args.deploy_config);
    let deploy_config = DeployConfig::from_file(&config_path)
        .with_context(|| format!("failed to process deploy config {}", config_path.display()))?;

    let events = connect_events(&config).await?;
    let docker = connect_docker(&config).await?;

    let registry = args.registry.or_else(|| config.registry.push_registry.clone());
    let push_auth = args.push_auth.or_else(|| config.registry.push_auth.clone());
    let builders_dir = args.builder_dir.unwrap_or_else(|| config.webhook.builders_dir.clone());

    let service = BuildService::new(Arc::new(GitSource::new()), docker, events, builders_dir)
        .with_registry(registry, push_auth);

    match service.build_from_config(&deploy_config, working_dir).await {
        Ok(artifact) => {
            info!(
                project = %artifact.project_key,
                version = %artifact.version_hash,
                tag = %artifact.image_reference,
                "Build published"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = ?e, "Failed to build");
            Err(e)
        }
    }
}
