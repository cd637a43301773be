// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::container::{
    ContainerEngine, ContainerSpec, ContainerState, CreatedContainer, EngineError, ImageDetails,
    ManagedContainer, OwnershipLabels,
};
use crate::domain::pipeline::ImageBuilder;
use async_trait::async_trait;
use base64::Engine as _;
use bollard::auth::DockerCredentials;
use bollard::models::{
    BuildInfo, ContainerCreateBody, CreateImageInfo, ErrorDetail, HostConfig, PortBinding, PushImageInfo,
};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, CreateImageOptions, ListContainersOptions,
    PushImageOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    TagImageOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const HOST_IP_ALL: &str = "0.0.0.0";

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(socket_path: Option<String>) -> Result<Self, EngineError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            #[cfg(unix)]
            let result = Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION);

            #[cfg(windows)]
            let result = Docker::connect_with_named_pipe(&path, 120, bollard::API_DEFAULT_VERSION);

            result.map_err(|e| EngineError::Connection(format!(
                "Failed to connect to Docker at {}: {}\n\n\
                 Ensure Docker is running and the socket path is correct.",
                path, e
            )))?
        } else {
            Docker::connect_with_local_defaults()
                .map_err(|e| EngineError::Connection(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                )))?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), EngineError> {
        self.docker.ping().await
            .map_err(|e| EngineError::Connection(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Verify with: docker ps",
                e
            )))?;
        Ok(())
    }
}

fn request_error(e: bollard::errors::Error) -> EngineError {
    EngineError::Request(e.to_string())
}

/// Registry auth as accepted by the engine's `X-Registry-Auth` header
#[derive(Debug, Default, Deserialize)]
struct EncodedAuthConfig {
    username: Option<String>,
    password: Option<String>,
    auth: Option<String>,
    email: Option<String>,
    serveraddress: Option<String>,
    identitytoken: Option<String>,
    registrytoken: Option<String>,
}

/// Decode an encoded auth config (base64 JSON); anything else is passed on
/// as a pre-encoded `user:password` auth value. Empty means anonymous.
fn credentials(registry_auth: &str) -> Option<DockerCredentials> {
    if registry_auth.is_empty() {
        return None;
    }

    let decoded = base64::engine::general_purpose::URL_SAFE
        .decode(registry_auth)
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(registry_auth))
        .ok()
        .and_then(|bytes| serde_json::from_slice::<EncodedAuthConfig>(&bytes).ok());

    Some(match decoded {
        Some(config) => DockerCredentials {
            username: config.username,
            password: config.password,
            auth: config.auth,
            email: config.email,
            serveraddress: config.serveraddress,
            identitytoken: config.identitytoken,
            registrytoken: config.registrytoken,
            ..Default::default()
        },
        None => DockerCredentials {
            auth: Some(registry_auth.to_string()),
            ..Default::default()
        },
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ProgressLine {
    status: Option<String>,
    error: Option<String>,
}

impl ProgressLine {
    fn new(status: Option<&str>, error: Option<&ErrorDetail>) -> Self {
        let trimmed = |s: &str| Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            status: status.and_then(trimmed),
            error: error.and_then(|detail| detail.message.as_deref()).and_then(trimmed),
        }
    }
}

/// A progress message from a pull, build or push stream
trait ProgressMessage {
    fn progress_line(&self) -> ProgressLine;
}

impl ProgressMessage for CreateImageInfo {
    fn progress_line(&self) -> ProgressLine {
        ProgressLine::new(self.status.as_deref(), self.error_detail.as_ref())
    }
}

impl ProgressMessage for PushImageInfo {
    fn progress_line(&self) -> ProgressLine {
        ProgressLine::new(self.status.as_deref(), self.error_detail.as_ref())
    }
}

impl ProgressMessage for BuildInfo {
    fn progress_line(&self) -> ProgressLine {
        let status = self.stream.as_deref().or(self.status.as_deref());
        ProgressLine::new(status, self.error_detail.as_ref())
    }
}

/// Drain a progress stream; only the final line decides success.
async fn scan_progress<S, T>(stream: S) -> Result<(), EngineError>
where
    S: Stream<Item = Result<T, bollard::errors::Error>>,
    T: ProgressMessage,
{
    let mut stream = std::pin::pin!(stream);
    let mut last: Option<ProgressLine> = None;

    while let Some(item) = stream.next().await {
        let line = match item {
            Ok(message) => message.progress_line(),
            Err(e) => ProgressLine { status: None, error: Some(e.to_string()) },
        };
        if let Some(status) = &line.status {
            debug!(status = %status, "docker progress");
        }
        last = Some(line);
    }

    match last {
        None => Err(EngineError::Stream("progress stream ended without a status line".to_string())),
        Some(ProgressLine { error: Some(error), .. }) => Err(EngineError::Stream(error)),
        Some(_) => Ok(()),
    }
}

async fn tar_context(context_dir: &Path) -> Result<Bytes, EngineError> {
    let dir: PathBuf = context_dir.to_path_buf();
    let archive = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &dir)?;
        builder.into_inner()
    })
    .await
    .map_err(|e| EngineError::Request(format!("tar task failed: {}", e)))?
    .map_err(|e| EngineError::Request(format!("failed to tar build context: {}", e)))?;

    Ok(Bytes::from(archive))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(&self, selector: &OwnershipLabels) -> Result<Vec<ManagedContainer>, EngineError> {
        let filters = HashMap::from([("label".to_string(), selector.filters())]);
        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await
            .map_err(|e| EngineError::Request(format!("failed to list containers with filters: {}", e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let state = summary
                    .state
                    .as_ref()
                    .map(|s| ContainerState::parse(&s.to_string()))
                    .unwrap_or_else(|| ContainerState::Unknown(String::new()));
                summary.id.map(|id| ManagedContainer { id, state })
            })
            .collect())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            ..Default::default()
        };
        self.docker.stop_container(id, Some(options)).await.map_err(request_error)
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await.map_err(request_error)
    }

    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageDetails>, EngineError> {
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(Some(ImageDetails {
                id: image.id.unwrap_or_else(|| reference.to_string()),
                default_cmd: image.config.map(|config| config.cmd.unwrap_or_default()),
            })),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(request_error(e)),
        }
    }

    async fn pull_image(&self, reference: &str, registry_auth: &str) -> Result<(), EngineError> {
        info!("Pulling image: {}", reference);
        let options = CreateImageOptions {
            from_image: Some(reference.to_string()),
            ..Default::default()
        };

        let stream = self.docker.create_image(Some(options), None, credentials(registry_auth));
        scan_progress(stream).await?;

        info!("Successfully pulled image: {}", reference);
        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<CreatedContainer, EngineError> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .port_bindings
            .into_iter()
            .map(|(port, host_port)| {
                (
                    port,
                    Some(vec![PortBinding {
                        host_ip: Some(HOST_IP_ALL.to_string()),
                        host_port: Some(host_port),
                    }]),
                )
            })
            .collect();

        let body = ContainerCreateBody {
            image: Some(spec.image),
            cmd: Some(spec.cmd),
            labels: Some(spec.labels),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(HostConfig {
                binds: Some(spec.binds),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.docker.create_container(None::<CreateContainerOptions>, body).await
            .map_err(|e| EngineError::Request(format!("failed to create the container: {}", e)))?;

        Ok(CreatedContainer { id: response.id, warnings: response.warnings })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker.start_container(id, None::<StartContainerOptions>).await
            .map_err(|e| EngineError::Request(format!("failed to start created container: {}", e)))
    }
}

#[async_trait]
impl ImageBuilder for DockerEngine {
    async fn build_image(
        &self,
        context_dir: &Path,
        repository: &str,
        tag: &str,
        builder_args: &str,
    ) -> Result<(), EngineError> {
        let context = tar_context(context_dir).await?;
        let image = format!("{}:{}", repository, tag);
        info!(image = %image, "Building image");

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: Some(image.clone()),
            rm: true,
            buildargs: Some(HashMap::from([("BUILDER_ARGS".to_string(), builder_args.to_string())])),
            ..Default::default()
        };

        let stream = self.docker.build_image(options, None, Some(bollard::body_full(context)));
        scan_progress(stream).await?;

        let latest = TagImageOptions {
            repo: Some(repository.to_string()),
            tag: Some("latest".to_string()),
            ..Default::default()
        };
        self.docker.tag_image(&image, Some(latest)).await.map_err(request_error)?;

        info!(image = %image, "Built image");
        Ok(())
    }

    async fn push_image(&self, repository: &str, tag: &str, registry_auth: &str) -> Result<(), EngineError> {
        let options = PushImageOptions {
            tag: Some(tag.to_string()),
            ..Default::default()
        };

        let stream = self.docker.push_image(repository, Some(options), credentials(registry_auth));
        scan_progress(stream).await?;

        info!(repository, tag, "Pushed image");
        Ok(())
    }
}
