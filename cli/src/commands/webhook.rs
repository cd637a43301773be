// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{bail, Context, Result};
use clap::Args;
use echo_core::application::{BuildQueueProcessor, BuildService, WebhookIngestor};
use echo_core::domain::node_config::EchoConfig;
use echo_core::domain::webhook::AllowedRefs;
use echo_core::infrastructure::GitSource;
use echo_core::presentation::webhook_api;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use super::{connect_docker, connect_events, shutdown_signal};

/// Launch the webhook server
#[derive(Debug, Args)]
pub struct WebhookArgs {
    /// Encoded credentials passed to the registry push
    #[arg(long, env = "PUSH_AUTH", hide_env_values = true)]
    pub push_auth: Option<String>,

    /// Registry images are pushed to; local-only when omitted
    #[arg(long)]
    pub registry: Option<String>,

    /// Docker socket path (defaults to auto-detection)
    #[arg(long)]
    pub docker_socket: Option<String>,

    /// Folder holding the builders
    #[arg(long)]
    pub builder_dir: Option<PathBuf>,

    /// Address and port the server binds to
    #[arg(long)]
    pub bind_address: Option<String>,

    /// JSON file mapping repositories (or `*`) to the refs allowed to build
    #[arg(long, value_name = "FILE")]
    pub allowed_refs_file: Option<PathBuf>,

    /// Pending builds accepted before requests are refused
    #[arg(long)]
    pub queue_capacity: Option<usize>,
}

pub async fn execute(args: WebhookArgs, mut config: EchoConfig) -> Result<()> {
    if args.docker_socket.is_some() {
        config.docker.socket_path = args.docker_socket.clone();
    }
    if let Some(capacity) = args.queue_capacity {
        config.webhook.queue_capacity = capacity;
    }
    config.validate().context("Configuration validation failed")?;

    let Some(refs_path) = args.allowed_refs_file.or_else(|| config.webhook.allowed_refs_file.clone()) else {
        bail!("an allowed refs file is required (--allowed-refs-file or webhook.allowed_refs_file)");
    };
    let allowed_refs = AllowedRefs::from_file(&refs_path).context("could not parse the allowed refs file")?;
    info!(path = %refs_path.display(), repositories = allowed_refs.len(), "Loaded allowed refs");

    let events = connect_events(&config).await?;
    let docker = connect_docker(&config).await?;

    let registry = args.registry.or_else(|| config.registry.push_registry.clone());
    let push_auth = args.push_auth.or_else(|| config.registry.push_auth.clone());
    let builders_dir = args.builder_dir.unwrap_or_else(|| config.webhook.builders_dir.clone());

    let source = Arc::new(GitSource::new());
    let build_service = Arc::new(
        BuildService::new(source.clone(), docker, events, builders_dir).with_registry(registry, push_auth),
    );

    let (ingestor, rx) = WebhookIngestor::new(allowed_refs, config.webhook.queue_capacity);
    let consumer = BuildQueueProcessor::new(source, build_service).start(rx);
    let app = webhook_api::app(Arc::new(ingestor));

    let bind_address = args.bind_address.unwrap_or_else(|| config.webhook.bind_address.clone());
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;

    info!(bind = %bind_address, queue_capacity = config.webhook.queue_capacity, "Launching webhook server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // The router owned the last queue sender; the consumer finishes what is queued.
    info!("Webhook server stopped, draining build queue");
    consumer.await.context("build queue consumer panicked")?;
    Ok(())
}
