// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deploy configuration checked into each project repository.
//
// ```toml
// [global]
// name = "app"
// repo = "org/app"
//
// [builder]
// id = "golang"
// exclude = ["target"]
// [builder.args]
// entrypoint = "./cmd/app"
//
// [exec]
// args = ["--port", "8080"]
// ports = { "8080" = 80 }
// volumes = [{ host = "/srv/app", bindTo = "/data", readonly = false }]
// domain = { host = "app.example.com", port = 8080 }
// ```

use crate::domain::build::ExecSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name the webhook consumer looks for at the root of a cloned repository
pub const WEBHOOK_CONFIG_FILE: &str = ".deploy-config.toml";

/// Default file name for local builds
pub const DEFAULT_CONFIG_FILE: &str = "deploy-config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalProperties {
    pub name: String,
    pub repo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuilderProperties {
    /// Directory name of the builder under the builders directory
    pub id: String,

    /// Extra `.dockerignore` patterns
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Passed verbatim to the image build as the `BUILDER_ARGS` JSON build-arg
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub global: GlobalProperties,
    pub builder: BuilderProperties,
    #[serde(default)]
    pub exec: ExecSpec,
}

#[derive(Debug, Error)]
pub enum DeployConfigError {
    #[error("Failed to read deploy config: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse toml config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl DeployConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DeployConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DeployConfigError> {
        Ok(toml::from_str(content)?)
    }
}
