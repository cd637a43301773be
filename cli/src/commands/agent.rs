// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Args;
use echo_core::application::{Agent, ContainerReconciler};
use echo_core::domain::node_config::EchoConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{connect_docker, connect_events, parse_key_val, shutdown_signal};

/// Launch the agent that starts containers for published builds
#[derive(Debug, Args)]
pub struct AgentArgs {
    /// Docker socket path (defaults to auto-detection)
    #[arg(long)]
    pub docker_socket: Option<String>,

    /// Credentials per registry as REGISTRY=AUTH; repeatable
    #[arg(long = "registry-auth", value_name = "REGISTRY=AUTH", value_parser = parse_key_val)]
    pub registry_auth: Vec<(String, String)>,
}

pub async fn execute(args: AgentArgs, mut config: EchoConfig) -> Result<()> {
    if args.docker_socket.is_some() {
        config.docker.socket_path = args.docker_socket.clone();
    }

    let mut registry_auth = config.registry.pull_auth.clone();
    registry_auth.extend(args.registry_auth);

    let events = connect_events(&config).await?;
    let docker = connect_docker(&config).await?;
    let agent = Agent::new(events, Arc::new(ContainerReconciler::new(docker)), registry_auth);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    agent.run(cancel).await.context("agent watch failed")?;
    info!("Agent shut down");
    Ok(())
}
