// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Build Event Store
//!
//! Encodes build descriptors into the coordination store's key schema and
//! turns the store's change feed back into complete artifacts.
//!
//! # Key Schema
//!
//! ```text
//! <namespace>/builds/<project_key>/name
//! <namespace>/builds/<project_key>/version
//! <namespace>/builds/<project_key>/repo
//! <namespace>/builds/<project_key>/timestamp
//! <namespace>/builds/<project_key>/tag
//! <namespace>/builds/<project_key>/registry
//! <namespace>/builds/<project_key>/exec      <- artifact-complete marker
//! ```
//!
//! Each field is its own entry so the change feed can be filtered on the
//! `exec` key without decoding payloads. All fields of one publish are
//! committed in a single batch; the watch still re-reads the whole
//! namespace of a project before notifying, so a notification never
//! carries anything but a fully decoded artifact.

use crate::domain::build::{BuildArtifact, ExecSpec, ProjectKey};
use crate::domain::store::{BuildStoreError, CoordinationStore, KeyValue, WatchEvent, WatchEventKind};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FIELD_NAME: &str = "name";
const FIELD_VERSION: &str = "version";
const FIELD_REPO: &str = "repo";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_TAG: &str = "tag";
const FIELD_REGISTRY: &str = "registry";
const FIELD_EXEC: &str = "exec";

/// How `watch` hands artifacts to its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Callback awaited inline: one at a time, in store-write order
    Synchronous,
    /// Callback spawned as its own task: no ordering between builds
    Detached,
}

pub struct BuildEventStore {
    store: Arc<dyn CoordinationStore>,
    namespace: String,
}

impl BuildEventStore {
    pub fn new(store: Arc<dyn CoordinationStore>, namespace: impl Into<String>) -> Self {
        Self { store, namespace: namespace.into() }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn builds_prefix(&self) -> String {
        format!("{}/builds/", self.namespace)
    }

    fn project_prefix(&self, key: &ProjectKey) -> String {
        format!("{}{}/", self.builds_prefix(), key)
    }

    /// Project key of a change event on an `exec` entry; `None` for any other key
    fn exec_key_project(&self, key: &str) -> Option<ProjectKey> {
        let project = key
            .strip_prefix(&self.builds_prefix())?
            .strip_suffix(&format!("/{}", FIELD_EXEC))?;
        if project.is_empty() || project.contains('/') {
            return None;
        }
        Some(ProjectKey::new(project))
    }

    /// Whether a change event signals a newly completed artifact
    pub fn completed_project(&self, event: &WatchEvent) -> Option<ProjectKey> {
        match event.kind {
            WatchEventKind::Put => self.exec_key_project(&event.key),
            WatchEventKind::Delete => None,
        }
    }

    /// Write every field of the artifact under its project key, replacing any previous build.
    pub async fn publish(&self, artifact: &BuildArtifact) -> Result<(), BuildStoreError> {
        let exec = serde_json::to_string(&artifact.exec_spec).map_err(|e| BuildStoreError::MalformedField {
            project: artifact.project_key.to_string(),
            field: FIELD_EXEC,
            reason: format!("failed to serialise exec config: {}", e),
        })?;

        info!(
            project = %artifact.project_key,
            name = %artifact.display_name,
            version = %artifact.version_hash,
            tag = %artifact.image_reference,
            registry = %artifact.registry,
            "Publishing build"
        );

        let prefix = self.project_prefix(&artifact.project_key);
        let field = |name: &str, value: String| KeyValue::new(format!("{}{}", prefix, name), value);

        // exec goes last: it is the entry watchers react to
        let entries = vec![
            field(FIELD_NAME, artifact.display_name.clone()),
            field(FIELD_VERSION, artifact.version_hash.clone()),
            field(FIELD_REPO, artifact.repository.clone()),
            field(FIELD_TIMESTAMP, artifact.published_at_millis.to_string()),
            field(FIELD_TAG, artifact.image_reference.clone()),
            field(FIELD_REGISTRY, artifact.registry.clone()),
            field(FIELD_EXEC, exec),
        ];

        self.store.put_all(entries).await?;
        metrics::counter!("echo_builds_published_total").increment(1);
        Ok(())
    }

    /// Reassemble the artifact currently stored for a project.
    pub async fn fetch(&self, key: &ProjectKey) -> Result<BuildArtifact, BuildStoreError> {
        let prefix = self.project_prefix(key);
        let entries = self.store.get_prefix(&prefix).await?;

        let mut fields: HashMap<String, String> = entries
            .into_iter()
            .filter_map(|kv| kv.key.strip_prefix(&prefix).map(|name| (name.to_string(), kv.value)))
            .collect();

        let mut take = |field: &'static str| {
            fields.remove(field).ok_or_else(|| BuildStoreError::IncompleteArtifact {
                project: key.to_string(),
                field,
            })
        };

        let display_name = take(FIELD_NAME)?;
        let version_hash = take(FIELD_VERSION)?;
        let timestamp = take(FIELD_TIMESTAMP)?;
        let image_reference = take(FIELD_TAG)?;
        let registry = take(FIELD_REGISTRY)?;
        let exec = take(FIELD_EXEC)?;
        let repository = take(FIELD_REPO).unwrap_or_default();

        let published_at_millis = timestamp.parse::<i64>().map_err(|e| BuildStoreError::MalformedField {
            project: key.to_string(),
            field: FIELD_TIMESTAMP,
            reason: format!("failed to parse timestamp {}: {}", timestamp, e),
        })?;

        let exec_spec: ExecSpec = serde_json::from_str(&exec).map_err(|e| BuildStoreError::MalformedField {
            project: key.to_string(),
            field: FIELD_EXEC,
            reason: format!("failed to parse exec config: {}", e),
        })?;

        Ok(BuildArtifact {
            project_key: key.clone(),
            display_name,
            repository,
            version_hash,
            image_reference,
            registry,
            published_at_millis,
            exec_spec,
        })
    }

    /// Deliver every newly published artifact until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation and `StoreUnavailable` if the change
    /// feed fails or ends. Artifacts that cannot be fetched or decoded are
    /// logged and skipped.
    pub async fn watch<F, Fut>(
        &self,
        cancel: CancellationToken,
        on_notify: F,
        mode: DeliveryMode,
    ) -> Result<(), BuildStoreError>
    where
        F: Fn(BuildArtifact) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut changes = self.store.watch_prefix(&format!("{}/", self.namespace)).await?;
        info!(namespace = %self.namespace, mode = ?mode, "Watching for new builds");

        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(namespace = %self.namespace, "Build watch cancelled");
                    return Ok(());
                }
                change = changes.next() => change,
            };

            let event = match change {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    error!(error = %e, "Build watch failed");
                    return Err(e.into());
                }
                None => {
                    warn!("Build watch stream ended");
                    return Err(crate::domain::store::StoreError::Watch("change feed closed".to_string()).into());
                }
            };

            let Some(project) = self.completed_project(&event) else {
                continue;
            };
            debug!(project = %project, "Found a new build");

            let artifact = match self.fetch(&project).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    error!(project = %project, error = %e, "Failed to handle new build");
                    metrics::counter!("echo_build_notifications_skipped_total").increment(1);
                    continue;
                }
            };

            metrics::counter!("echo_build_notifications_total").increment(1);
            match mode {
                DeliveryMode::Synchronous => on_notify(artifact).await,
                DeliveryMode::Detached => {
                    tokio::spawn(on_notify(artifact));
                }
            }
        }
    }
}
