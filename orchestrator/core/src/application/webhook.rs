// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Webhook Ingestion
//!
//! Validates push notifications and hands accepted events to a single
//! sequential consumer through a bounded queue. Accepting a request never
//! waits for a build: a full queue is reported to the sender instead.

use crate::domain::deploy_config::WEBHOOK_CONFIG_FILE;
use crate::domain::pipeline::{BuildPipeline, SourceRepository};
use crate::domain::webhook::{AllowedRefs, PushEvent, WebhookRejection, PUSH_EVENT};
use anyhow::{bail, Context, Result};
use axum::http::Method;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Request-side half of the webhook: validation and non-blocking enqueue.
pub struct WebhookIngestor {
    allowed_refs: AllowedRefs,
    queue: mpsc::Sender<PushEvent>,
}

impl WebhookIngestor {
    /// Returns the ingestor together with the receiving end of its queue.
    pub fn new(allowed_refs: AllowedRefs, capacity: usize) -> (Self, mpsc::Receiver<PushEvent>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (Self { allowed_refs, queue }, rx)
    }

    pub fn check_method(&self, method: &Method) -> Result<(), WebhookRejection> {
        if method == Method::POST {
            Ok(())
        } else {
            Err(WebhookRejection::MethodNotAllowed(method.to_string()))
        }
    }

    /// Validate a POSTed body and queue it for building.
    ///
    /// Checks run in order: body parse, ref allow-list, event header,
    /// enqueue. The first failing check decides the rejection.
    pub fn admit(&self, event_header: Option<&str>, body: &[u8]) -> Result<PushEvent, WebhookRejection> {
        let event: PushEvent =
            serde_json::from_slice(body).map_err(|e| WebhookRejection::UnreadableBody(e.to_string()))?;

        if !self.allowed_refs.is_allowed(&event.repository.full_name, &event.git_ref) {
            return Err(WebhookRejection::RefNotAuthorized {
                repository: event.repository.full_name,
                git_ref: event.git_ref,
            });
        }

        match event_header {
            Some(PUSH_EVENT) => {}
            other => return Err(WebhookRejection::BadEventType(other.unwrap_or_default().to_string())),
        }

        self.queue.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => WebhookRejection::QueueFull,
            TrySendError::Closed(_) => WebhookRejection::QueueClosed,
        })?;

        info!(repository = %event.repository.full_name, git_ref = %event.git_ref, "Queued push event");
        Ok(event)
    }

    /// Free slots left in the queue
    pub fn available_capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Consumer half: drains the queue one event at a time.
pub struct BuildQueueProcessor {
    source: Arc<dyn SourceRepository>,
    pipeline: Arc<dyn BuildPipeline>,
}

impl BuildQueueProcessor {
    pub fn new(source: Arc<dyn SourceRepository>, pipeline: Arc<dyn BuildPipeline>) -> Self {
        Self { source, pipeline }
    }

    /// Spawn the consumer. It exits once every sender is dropped and the queue is drained.
    pub fn start(self, mut rx: mpsc::Receiver<PushEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let repository = event.repository.full_name.clone();
                match self.process_event(&event).await {
                    Ok(()) => {
                        metrics::counter!("echo_webhook_builds_total", "outcome" => "success").increment(1);
                    }
                    Err(e) => {
                        metrics::counter!("echo_webhook_builds_total", "outcome" => "failure").increment(1);
                        error!(repository = %repository, git_ref = %event.git_ref, error = ?e, "Failed to build");
                    }
                }
            }
            debug!("Build queue closed, consumer exiting");
        })
    }

    /// Clone, build and publish one push event inside a throwaway directory.
    pub async fn process_event(&self, event: &PushEvent) -> Result<()> {
        let workdir = tempfile::Builder::new()
            .prefix("echocicd-")
            .tempdir()
            .context("failed to create temporary build directory")?;
        let path = workdir.path().to_path_buf();

        let result = self.build_checkout(event, &path).await;

        if let Err(e) = workdir.close() {
            warn!(path = %path.display(), error = %e, "Failed to clean up temporary directory");
        }
        result
    }

    async fn build_checkout(&self, event: &PushEvent, dir: &std::path::Path) -> Result<()> {
        info!(repository = %event.repository.full_name, git_ref = %event.git_ref, "Building");

        self.source
            .clone_repository(&event.repository.clone_url, dir)
            .await
            .with_context(|| format!("failed to clone {}", event.repository.clone_url))?;

        let config_path = dir.join(WEBHOOK_CONFIG_FILE);
        let metadata = tokio::fs::metadata(&config_path)
            .await
            .with_context(|| format!("could not find {} in repository", WEBHOOK_CONFIG_FILE))?;
        if !metadata.is_file() {
            bail!("{} is not a regular file", WEBHOOK_CONFIG_FILE);
        }

        let artifact = self.pipeline.build_in_dir(dir, WEBHOOK_CONFIG_FILE).await?;
        info!(
            project = %artifact.project_key,
            version = %artifact.version_hash,
            tag = %artifact.image_reference,
            "Build published"
        );
        Ok(())
    }
}
