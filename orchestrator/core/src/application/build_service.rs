// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Build Service
//!
//! Turns a checked-out project into a published artifact: resolve the
//! commit hash, lay the builder's files over the checkout, build and
//! optionally push the image, then publish the descriptor.

use crate::application::build_event_store::BuildEventStore;
use crate::domain::build::{BuildArtifact, ProjectKey, PublishRequest};
use crate::domain::deploy_config::DeployConfig;
use crate::domain::pipeline::{BuildPipeline, ImageBuilder, SourceRepository};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

const DOCKER_IGNORE: &str = ".dockerignore";

pub struct BuildService {
    source: Arc<dyn SourceRepository>,
    images: Arc<dyn ImageBuilder>,
    events: Arc<BuildEventStore>,
    builders_dir: PathBuf,
    registry: Option<String>,
    push_auth: Option<String>,
}

impl BuildService {
    pub fn new(
        source: Arc<dyn SourceRepository>,
        images: Arc<dyn ImageBuilder>,
        events: Arc<BuildEventStore>,
        builders_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            images,
            events,
            builders_dir: builders_dir.into(),
            registry: None,
            push_auth: None,
        }
    }

    /// Push built images to `registry` using the encoded `auth`
    pub fn with_registry(mut self, registry: Option<String>, auth: Option<String>) -> Self {
        self.registry = registry.filter(|r| !r.is_empty());
        self.push_auth = auth;
        self
    }

    pub async fn build_from_config(&self, config: &DeployConfig, working_dir: &Path) -> Result<BuildArtifact> {
        let hash = self.source.head_commit(working_dir).await?;

        let builder_dir = self.builders_dir.join(&config.builder.id);
        info!(path = %builder_dir.display(), id = %config.builder.id, "Looking for builder");
        let metadata = tokio::fs::metadata(&builder_dir)
            .await
            .with_context(|| format!("the builder could not be loaded by id {}", config.builder.id))?;
        if !metadata.is_dir() {
            bail!("the builder {} is invalid, expected a directory", builder_dir.display());
        }

        prepare_context(&builder_dir, working_dir, &config.builder.exclude).await?;

        let repository = match &self.registry {
            Some(registry) => format!("{}/{}", registry, config.global.name),
            None => config.global.name.clone(),
        };
        debug!(tag = %repository, "Tag prepared");

        let builder_args =
            serde_json::to_string(&config.builder.args).context("failed to serialise builder args")?;
        self.images
            .build_image(working_dir, &repository, &hash, &builder_args)
            .await
            .context("failed to build image")?;

        if self.registry.is_some() {
            let auth = self.push_auth.as_deref().unwrap_or("");
            for tag in [hash.as_str(), "latest"] {
                self.images
                    .push_image(&repository, tag, auth)
                    .await
                    .with_context(|| format!("failed to push {}:{}", repository, tag))?;
            }
        }

        let artifact = PublishRequest {
            project_key: ProjectKey::from_repository(&config.global.repo),
            display_name: config.global.name.clone(),
            repository: config.global.repo.clone(),
            version_hash: hash.clone(),
            image_reference: format!("{}:{}", repository, hash),
            registry: self.registry.clone().unwrap_or_default(),
            exec_spec: config.exec.clone(),
        }
        .stamp_now();

        self.events
            .publish(&artifact)
            .await
            .context("failed to write build details to the coordination store")?;
        Ok(artifact)
    }
}

#[async_trait]
impl BuildPipeline for BuildService {
    async fn build_in_dir(&self, directory: &Path, config_file: &str) -> Result<BuildArtifact> {
        let path = directory.join(config_file);
        let config = DeployConfig::from_file(&path)
            .with_context(|| format!("failed to process deploy config {}", path.display()))?;
        self.build_from_config(&config, directory).await
    }
}

/// Copy the builder's files over the checkout and merge `.dockerignore`.
///
/// The project's own ignore patterns survive a builder that ships its own
/// `.dockerignore`: they are appended after the builder's, followed by the
/// configured excludes.
async fn prepare_context(builder_dir: &Path, working_dir: &Path, exclude: &[String]) -> Result<()> {
    let builder_dir = builder_dir.to_path_buf();
    let working_dir = working_dir.to_path_buf();
    let exclude = exclude.to_vec();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let ignore_path = working_dir.join(DOCKER_IGNORE);
        let existing = match std::fs::read_to_string(&ignore_path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e).context("could not read existing .dockerignore"),
        };

        copy_tree(&builder_dir, &working_dir).context("failed to copy from builder to working dir")?;

        let mut merged = String::from("\n\n");
        if let Some(existing) = existing {
            merged.push_str(&existing);
        }
        for pattern in &exclude {
            if !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(pattern);
        }

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&ignore_path)
            .context("failed to create .dockerignore")?;
        file.write_all(merged.as_bytes()).context("failed to write .dockerignore")?;
        Ok(())
    })
    .await
    .context("context preparation task failed")?
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
