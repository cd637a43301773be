// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container engine port and the ownership label schema.
//!
//! Containers started by the reconciler are never tracked in a local
//! registry. Ownership is expressed purely through labels, so the label
//! schema below is a contract shared by every agent in the fleet:
//!
//! | Label | Value |
//! |-------|-------|
//! | `managed-by` | [`OWNER`] |
//! | `echo-project` | the project key |
//! | `domain:<host>` | routed port (optional) |

use crate::domain::build::{BuildArtifact, ProjectKey};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

pub const LABEL_OWNER: &str = "managed-by";
pub const LABEL_PROJECT: &str = "echo-project";
pub const DOMAIN_LABEL_PREFIX: &str = "domain:";

/// Owner marker carried by every container this system manages
pub const OWNER: &str = "echocicd";

/// Selector for the containers owned by one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipLabels {
    pub owner: String,
    pub project: ProjectKey,
}

impl OwnershipLabels {
    pub fn for_project(project: &ProjectKey) -> Self {
        Self { owner: OWNER.to_string(), project: project.clone() }
    }

    /// `key=value` pairs in the engine's label filter syntax
    pub fn filters(&self) -> Vec<String> {
        vec![
            format!("{}={}", LABEL_OWNER, self.owner),
            format!("{}={}", LABEL_PROJECT, self.project),
        ]
    }

    pub fn labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_OWNER.to_string(), self.owner.clone()),
            (LABEL_PROJECT.to_string(), self.project.to_string()),
        ])
    }

    /// Ownership labels plus the routing label derived from the domain hint
    pub fn labels_for(&self, artifact: &BuildArtifact) -> HashMap<String, String> {
        let mut labels = self.labels();
        if let Some(domain) = &artifact.exec_spec.domain {
            labels.insert(format!("{}{}", DOMAIN_LABEL_PREFIX, domain.host), domain.port.to_string());
        }
        labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Removing,
    Dead,
    Unknown(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "removing" => Self::Removing,
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Running and restarting containers get a graceful stop before removal
    pub fn needs_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub state: ContainerState,
}

/// What the engine knows about a locally present image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
    /// Default command from the image config; `None` when the image has no config at all
    pub default_cmd: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub binds: Vec<String>,
    /// `port/proto` to host port, published on all interfaces
    pub port_bindings: BTreeMap<String, String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to connect to container engine: {0}")]
    Connection(String),
    #[error("Container engine request failed: {0}")]
    Request(String),
    #[error("Container engine reported an error: {0}")]
    Stream(String),
}

/// Client for the container engine the agent drives.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List containers carrying all ownership labels, stopped ones included
    async fn list_containers(&self, selector: &OwnershipLabels) -> Result<Vec<ManagedContainer>, EngineError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    /// Forced removal
    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// `Ok(None)` when the image is not present locally
    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>, EngineError>;

    /// Pull an image, failing if the final progress line reports an error
    async fn pull_image(&self, reference: &str, registry_auth: &str) -> Result<(), EngineError>;

    async fn create_container(&self, spec: ContainerSpec) -> Result<CreatedContainer, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Image {image} is unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("Received warnings while creating container: {}", warnings.join("; "))]
    CreateWarning { warnings: Vec<String> },

    #[error(transparent)]
    ContainerEngine(#[from] EngineError),
}
