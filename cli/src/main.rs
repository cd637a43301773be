// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # echo-cicd
//!
//! One binary, three roles:
//!
//! - `echo-cicd build` - build the working directory and publish the result
//! - `echo-cicd webhook-server` - receive push notifications and build them
//! - `echo-cicd agent` - run the latest published build of every project on this host

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echo_cicd::commands::{self, AgentArgs, BuildArgs, GlobalArgs, WebhookArgs};
use echo_cicd::telemetry;
use tracing::info;

/// echo-cicd - push-to-deploy for a fleet of Docker hosts
#[derive(Parser)]
#[command(name = "echo-cicd")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a build in the current folder
    #[command(name = "build")]
    Build(BuildArgs),

    /// Launch the webhook server
    #[command(name = "webhook-server")]
    WebhookServer(WebhookArgs),

    /// Launch the agent which will be responsible for starting containers
    #[command(name = "agent")]
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.global.load_config()?;
    telemetry::init_logging(&config.logging).context("Failed to initialise logging")?;
    if config.metrics.enabled {
        telemetry::init_metrics(&config.metrics)?;
    }
    info!(version = env!("CARGO_PKG_VERSION"), "echo-cicd starting");

    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &cli.global.working_dir, config).await,
        Commands::WebhookServer(args) => commands::webhook::execute(args, config).await,
        Commands::Agent(args) => commands::agent::execute(args, config).await,
    }
}
