// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use async_trait::async_trait;
use echo_core::application::{
    Agent, BuildEventStore, BuildQueueProcessor, BuildService, ContainerReconciler, WebhookIngestor,
};
use echo_core::domain::build::{BuildArtifact, ExecSpec, ProjectKey};
use echo_core::domain::container::{
    ContainerEngine, ContainerSpec, ContainerState, CreatedContainer, EngineError, ImageDetails,
    ManagedContainer, OwnershipLabels, ReconcileError,
};
use echo_core::domain::pipeline::{ImageBuilder, SourceRepository};
use echo_core::domain::store::{BuildStoreError, CoordinationStore};
use echo_core::domain::webhook::{AllowedRefs, WebhookRejection};
use echo_core::infrastructure::InMemoryCoordinationStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const DEPLOY_CONFIG: &str = r#"
[global]
name = "app"
repo = "org/app"

[builder]
id = "golang"

[exec]
args = ["--listen", ":8080"]
ports = { "8080" = 80 }
domain = { host = "app.example.com", port = 8080 }
"#;

/// Checkout double: every clone produces a repository with the deploy config.
struct FakeSource;

#[async_trait]
impl SourceRepository for FakeSource {
    async fn clone_repository(&self, _clone_url: &str, destination: &Path) -> Result<()> {
        std::fs::write(destination.join(".deploy-config.toml"), DEPLOY_CONFIG)?;
        Ok(())
    }

    async fn head_commit(&self, _directory: &Path) -> Result<String> {
        Ok("abc123".into())
    }
}

/// Builder and engine double sharing one image cache.
#[derive(Default)]
struct FakeDocker {
    images: Mutex<HashMap<String, ImageDetails>>,
    containers: Mutex<Vec<(ManagedContainer, HashMap<String, String>)>>,
    started: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
    create_warnings: Mutex<Vec<String>>,
}

impl FakeDocker {
    fn add_container(&self, id: &str, state: &str, project: &str) {
        let labels = OwnershipLabels::for_project(&ProjectKey::new(project)).labels();
        self.containers.lock().push((
            ManagedContainer { id: id.into(), state: ContainerState::parse(state) },
            labels,
        ));
    }
}

#[async_trait]
impl ImageBuilder for FakeDocker {
    async fn build_image(
        &self,
        _context_dir: &Path,
        repository: &str,
        tag: &str,
        _builder_args: &str,
    ) -> Result<(), EngineError> {
        let details = ImageDetails {
            id: format!("sha256:{}", tag),
            default_cmd: Some(vec!["/app".into()]),
        };
        let mut images = self.images.lock();
        images.insert(format!("{}:{}", repository, tag), details.clone());
        images.insert(format!("{}:latest", repository), details);
        Ok(())
    }

    async fn push_image(&self, _repository: &str, _tag: &str, _registry_auth: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeDocker {
    async fn list_containers(&self, selector: &OwnershipLabels) -> Result<Vec<ManagedContainer>, EngineError> {
        let wanted = selector.labels();
        Ok(self
            .containers
            .lock()
            .iter()
            .filter(|(_, labels)| wanted.iter().all(|(k, v)| labels.get(k) == Some(v)))
            .map(|(container, _)| container.clone())
            .collect())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        for (container, _) in self.containers.lock().iter_mut() {
            if container.id == id {
                container.state = ContainerState::Exited;
            }
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.containers.lock().retain(|(c, _)| c.id != id);
        self.removed.lock().push(id.to_string());
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>, EngineError> {
        Ok(self.images.lock().get(reference).cloned())
    }

    async fn pull_image(&self, reference: &str, _registry_auth: &str) -> Result<(), EngineError> {
        Err(EngineError::Stream(format!("{} not found", reference)))
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<CreatedContainer, EngineError> {
        let id = format!("c{}", self.created.lock().len() + 1);
        self.containers.lock().push((
            ManagedContainer { id: id.clone(), state: ContainerState::Created },
            spec.labels.clone(),
        ));
        self.created.lock().push(spec);
        Ok(CreatedContainer { id, warnings: self.create_warnings.lock().clone() })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        for (container, _) in self.containers.lock().iter_mut() {
            if container.id == id {
                container.state = ContainerState::Running;
            }
        }
        self.started.lock().push(id.to_string());
        Ok(())
    }
}

struct Harness {
    _builders: tempfile::TempDir,
    store: Arc<InMemoryCoordinationStore>,
    events: Arc<BuildEventStore>,
    docker: Arc<FakeDocker>,
    ingestor: WebhookIngestor,
    processor: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
    agent: tokio::task::JoinHandle<Result<(), BuildStoreError>>,
}

async fn harness(allowed: &str) -> Harness {
    let builders = tempfile::tempdir().unwrap();
    let golang: PathBuf = builders.path().join("golang");
    std::fs::create_dir_all(&golang).unwrap();
    std::fs::write(golang.join("Dockerfile"), "FROM scratch\n").unwrap();

    let store = Arc::new(InMemoryCoordinationStore::default());
    let events = Arc::new(BuildEventStore::new(store.clone(), "echocicd"));
    let docker = Arc::new(FakeDocker::default());

    let build_service = Arc::new(BuildService::new(
        Arc::new(FakeSource),
        docker.clone(),
        events.clone(),
        builders.path(),
    ));
    let (ingestor, rx) = WebhookIngestor::new(AllowedRefs::from_json_str(allowed).unwrap(), 10);
    let processor = BuildQueueProcessor::new(Arc::new(FakeSource), build_service).start(rx);

    let agent = Agent::new(events.clone(), Arc::new(ContainerReconciler::new(docker.clone())), HashMap::new());
    let cancel = CancellationToken::new();
    let agent = {
        let cancel = cancel.clone();
        tokio::spawn(async move { agent.run(cancel).await })
    };
    while store.watcher_count() == 0 {
        tokio::task::yield_now().await;
    }

    Harness { _builders: builders, store, events, docker, ingestor, processor, cancel, agent }
}

fn push_body(full_name: &str, git_ref: &str) -> Vec<u8> {
    serde_json::json!({
        "ref": git_ref,
        "repository": {"clone_url": format!("https://git.example/{}.git", full_name), "full_name": full_name}
    })
    .to_string()
    .into_bytes()
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_push_is_built_published_and_deployed() {
    let h = harness(r#"{"org/app": ["refs/heads/main"]}"#).await;
    h.docker.add_container("old", "running", "org__app");
    h.docker.add_container("unrelated", "running", "org__other");

    h.ingestor.admit(Some("push"), &push_body("org/app", "refs/heads/main")).unwrap();

    let docker = h.docker.clone();
    wait_until(move || !docker.started.lock().is_empty()).await;

    let artifact = h.events.fetch(&ProjectKey::new("org__app")).await.unwrap();
    assert_eq!(artifact.display_name, "app");
    assert_eq!(artifact.version_hash, "abc123");
    assert_eq!(artifact.image_reference, "app:abc123");
    assert_eq!(artifact.registry, "");

    assert_eq!(h.docker.removed.lock().clone(), vec!["old"]);
    let spec = h.docker.created.lock()[0].clone();
    assert_eq!(spec.image, "sha256:abc123");
    assert_eq!(spec.cmd, vec!["/app", "--listen", ":8080"]);
    assert_eq!(spec.port_bindings.get("8080/tcp").map(String::as_str), Some("80"));
    assert_eq!(spec.labels.get("echo-project").map(String::as_str), Some("org__app"));
    assert_eq!(spec.labels.get("domain:app.example.com").map(String::as_str), Some("8080"));

    let remaining: Vec<String> = h.docker.containers.lock().iter().map(|(c, _)| c.id.clone()).collect();
    assert_eq!(remaining, vec!["unrelated", "c1"]);

    h.cancel.cancel();
    assert!(h.agent.await.unwrap().is_ok());
    drop(h.ingestor);
    h.processor.await.unwrap();
}

#[tokio::test]
async fn test_unlisted_ref_queues_nothing() {
    let h = harness(r#"{"org/app": ["refs/heads/main"]}"#).await;

    let rejection = h
        .ingestor
        .admit(Some("push"), &push_body("org/app", "refs/heads/feature-x"))
        .unwrap_err();
    assert!(matches!(rejection, WebhookRejection::RefNotAuthorized { .. }));
    assert_eq!(rejection.status_code().as_u16(), 403);

    drop(h.ingestor);
    h.processor.await.unwrap();
    assert!(h.store.get_prefix("echocicd/").await.unwrap().is_empty());
    assert!(h.docker.created.lock().is_empty());

    h.cancel.cancel();
    assert!(h.agent.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_create_warnings_leave_container_stopped() {
    let h = harness(r#"{"*": ["refs/heads/main"]}"#).await;
    *h.docker.create_warnings.lock() = vec!["kernel does not support swap limit".into()];
    h.docker.add_container("old", "running", "org__app");

    h.ingestor.admit(Some("push"), &push_body("org/app", "refs/heads/main")).unwrap();

    let docker = h.docker.clone();
    wait_until(move || !docker.created.lock().is_empty()).await;

    // Drain the synchronous watch before checking that nothing was started
    h.cancel.cancel();
    assert!(h.agent.await.unwrap().is_ok());

    assert!(h.docker.started.lock().is_empty());
    assert_eq!(h.docker.removed.lock().clone(), vec!["old"]);
    let states: Vec<ContainerState> = h.docker.containers.lock().iter().map(|(c, _)| c.state.clone()).collect();
    assert_eq!(states, vec![ContainerState::Created]);

    drop(h.ingestor);
    h.processor.await.unwrap();
}

#[tokio::test]
async fn test_reconcile_reports_create_warnings_after_removing_old_container() {
    let docker = Arc::new(FakeDocker::default());
    docker.add_container("old", "running", "org__app");
    docker.images.lock().insert(
        "app:abc123".into(),
        ImageDetails { id: "sha256:abc123".into(), default_cmd: Some(vec!["/app".into()]) },
    );
    *docker.create_warnings.lock() = vec!["kernel does not support swap limit".into()];
    let reconciler = ContainerReconciler::new(docker.clone());

    let artifact = BuildArtifact {
        project_key: ProjectKey::new("org__app"),
        display_name: "app".into(),
        repository: "org/app".into(),
        version_hash: "abc123".into(),
        image_reference: "app:abc123".into(),
        registry: String::new(),
        published_at_millis: 1,
        exec_spec: ExecSpec::default(),
    };
    let result = reconciler.reconcile(&artifact, &HashMap::new()).await;

    assert!(matches!(result, Err(ReconcileError::CreateWarning { .. })));
    assert_eq!(docker.removed.lock().clone(), vec!["old"]);
    assert!(docker.started.lock().is_empty());
}

#[tokio::test]
async fn test_second_cleanup_changes_nothing() {
    let docker = Arc::new(FakeDocker::default());
    docker.add_container("a", "running", "org__app");
    docker.add_container("b", "exited", "org__app");
    let reconciler = ContainerReconciler::new(docker.clone());
    let project = ProjectKey::new("org__app");

    assert_eq!(reconciler.cleanup(&project).await.unwrap(), 2);
    assert_eq!(reconciler.cleanup(&project).await.unwrap(), 0);
    assert_eq!(docker.removed.lock().clone(), vec!["a", "b"]);
}
