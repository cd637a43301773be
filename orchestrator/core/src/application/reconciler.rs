// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container Reconciler
//!
//! Replaces whatever this host runs for a project with a container for the
//! newly published artifact. Ownership is discovered through labels only, so
//! the reconciler keeps no state between artifacts.

use crate::domain::build::{BuildArtifact, ProjectKey};
use crate::domain::container::{ContainerEngine, ContainerSpec, EngineError, OwnershipLabels, ReconcileError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Grace period handed to the engine before it kills a stopping container
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(60);

pub struct ContainerReconciler {
    engine: Arc<dyn ContainerEngine>,
    stop_grace: Duration,
}

impl ContainerReconciler {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine, stop_grace: DEFAULT_STOP_GRACE }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Stop and remove every container this system owns for `project`.
    ///
    /// Containers are handled one at a time: a live container is stopped and
    /// then removed. A failed stop aborts the cleanup before that container is
    /// removed; earlier containers stay removed. Returns how many were removed.
    pub async fn cleanup(&self, project: &ProjectKey) -> Result<usize, ReconcileError> {
        let selector = OwnershipLabels::for_project(project);
        let containers = self.engine.list_containers(&selector).await?;
        debug!(project = %project, count = containers.len(), "Found managed containers");

        for container in &containers {
            if container.state.needs_stop() {
                info!(project = %project, container_id = %container.id, "Stopping container");
                self.engine.stop_container(&container.id, self.stop_grace).await?;
            }
            info!(project = %project, container_id = %container.id, "Removing container");
            self.engine.remove_container(&container.id).await?;
        }

        Ok(containers.len())
    }

    /// Ensure the artifact's image is local, then create and start its container.
    ///
    /// `registry_auth` maps registry host to encoded credentials; a registry
    /// with no entry is pulled anonymously. Returns the new container id.
    pub async fn apply(
        &self,
        artifact: &BuildArtifact,
        registry_auth: &HashMap<String, String>,
    ) -> Result<String, ReconcileError> {
        let image_ref = artifact.image_reference.as_str();

        let image = match self.engine.inspect_image(image_ref).await? {
            Some(image) => image,
            None => {
                info!(image = %image_ref, registry = %artifact.registry, "Pulling image");
                let auth = registry_auth.get(&artifact.registry).map(String::as_str).unwrap_or("");
                self.engine.pull_image(image_ref, auth).await.map_err(|e| match e {
                    EngineError::Stream(reason) => ReconcileError::ImageUnavailable {
                        image: image_ref.to_string(),
                        reason,
                    },
                    other => ReconcileError::ContainerEngine(other),
                })?;
                metrics::counter!("echo_images_pulled_total").increment(1);

                self.engine
                    .inspect_image(image_ref)
                    .await?
                    .ok_or_else(|| ReconcileError::ImageUnavailable {
                        image: image_ref.to_string(),
                        reason: "image missing after pull".to_string(),
                    })?
            }
        };

        let Some(mut cmd) = image.default_cmd else {
            return Err(EngineError::Request(format!("image {} has no config", image_ref)).into());
        };
        cmd.extend(artifact.exec_spec.args.iter().cloned());

        let spec = ContainerSpec {
            image: image.id,
            cmd,
            binds: artifact.exec_spec.bind_mounts(),
            port_bindings: artifact.exec_spec.published_ports(),
            labels: OwnershipLabels::for_project(&artifact.project_key).labels_for(artifact),
        };

        let created = self.engine.create_container(spec).await?;
        if !created.warnings.is_empty() {
            warn!(
                project = %artifact.project_key,
                container_id = %created.id,
                warnings = ?created.warnings,
                "Container created with warnings; not starting it"
            );
            return Err(ReconcileError::CreateWarning { warnings: created.warnings });
        }

        self.engine.start_container(&created.id).await?;
        info!(project = %artifact.project_key, container_id = %created.id, "Started container");
        Ok(created.id)
    }

    /// Cleanup followed by apply
    pub async fn reconcile(
        &self,
        artifact: &BuildArtifact,
        registry_auth: &HashMap<String, String>,
    ) -> Result<String, ReconcileError> {
        let removed = self.cleanup(&artifact.project_key).await?;
        if removed > 0 {
            debug!(project = %artifact.project_key, removed, "Removed previous containers");
        }
        self.apply(artifact, registry_auth).await
    }
}
