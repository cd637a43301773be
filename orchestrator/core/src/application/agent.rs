// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::build_event_store::{BuildEventStore, DeliveryMode};
use crate::application::reconciler::ContainerReconciler;
use crate::domain::store::BuildStoreError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fleet agent: reconciles this host against every newly published build.
///
/// Builds are handled one at a time in publication order, so two builds of
/// the same project never race on its containers.
pub struct Agent {
    events: Arc<BuildEventStore>,
    reconciler: Arc<ContainerReconciler>,
    registry_auth: Arc<HashMap<String, String>>,
}

impl Agent {
    pub fn new(
        events: Arc<BuildEventStore>,
        reconciler: Arc<ContainerReconciler>,
        registry_auth: HashMap<String, String>,
    ) -> Self {
        Self { events, reconciler, registry_auth: Arc::new(registry_auth) }
    }

    /// Run until `cancel` fires or the store's change feed fails.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BuildStoreError> {
        info!(
            namespace = %self.events.namespace(),
            registries = self.registry_auth.len(),
            "Agent started"
        );

        let reconciler = self.reconciler.clone();
        let registry_auth = self.registry_auth.clone();

        let result = self
            .events
            .watch(
                cancel,
                move |artifact| {
                    let reconciler = reconciler.clone();
                    let registry_auth = registry_auth.clone();
                    async move {
                        info!(
                            project = %artifact.project_key,
                            version = %artifact.version_hash,
                            image = %artifact.image_reference,
                            "Reconciling new build"
                        );
                        match reconciler.reconcile(&artifact, &registry_auth).await {
                            Ok(container_id) => {
                                metrics::counter!("echo_reconciles_total", "outcome" => "success").increment(1);
                                info!(
                                    project = %artifact.project_key,
                                    version = %artifact.version_hash,
                                    container_id = %container_id,
                                    "Deployed build"
                                );
                            }
                            Err(e) => {
                                metrics::counter!("echo_reconciles_total", "outcome" => "failure").increment(1);
                                error!(
                                    project = %artifact.project_key,
                                    version = %artifact.version_hash,
                                    error = %e,
                                    "Failed to deploy build"
                                );
                            }
                        }
                    }
                },
                DeliveryMode::Synchronous,
            )
            .await;

        info!("Agent stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reconciler::tests::RecordingEngine;
    use crate::domain::build::{BuildArtifact, ExecSpec, ProjectKey};
    use crate::domain::container::ImageDetails;
    use crate::infrastructure::memory_store::InMemoryCoordinationStore;
    use std::time::Duration;

    fn artifact(version: &str) -> BuildArtifact {
        BuildArtifact {
            project_key: ProjectKey::new("org__app"),
            display_name: "app".into(),
            repository: "org/app".into(),
            version_hash: version.into(),
            image_reference: format!("app:{}", version),
            registry: String::new(),
            published_at_millis: 1,
            exec_spec: ExecSpec::default(),
        }
    }

    #[tokio::test]
    async fn test_agent_reconciles_published_builds_until_cancelled() {
        let store = Arc::new(InMemoryCoordinationStore::default());
        let events = Arc::new(BuildEventStore::new(store.clone(), "echocicd"));
        let engine = Arc::new(RecordingEngine::default());
        for version in ["v1", "v2"] {
            engine.images.lock().insert(
                format!("app:{}", version),
                ImageDetails { id: format!("sha256:{}", version), default_cmd: Some(vec![]) },
            );
        }

        let agent = Agent::new(events.clone(), Arc::new(ContainerReconciler::new(engine.clone())), HashMap::new());
        let cancel = CancellationToken::new();
        let running = {
            let cancel = cancel.clone();
            tokio::spawn(async move { agent.run(cancel).await })
        };

        while store.watcher_count() == 0 {
            tokio::task::yield_now().await;
        }
        // Each notification re-reads the project, so wait for v1 to land before superseding it
        for (version, deployed) in [("v1", 1), ("v2", 2)] {
            events.publish(&artifact(version)).await.unwrap();
            tokio::time::timeout(Duration::from_secs(5), async {
                while engine.created.lock().len() < deployed {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }

        let images: Vec<String> = engine.created.lock().iter().map(|s| s.image.clone()).collect();
        assert_eq!(images, vec!["sha256:v1", "sha256:v2"]);

        cancel.cancel();
        assert!(running.await.unwrap().is_ok());
    }
}
