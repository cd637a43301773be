// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ports to the collaborators that turn a pushed commit into an artifact.

use crate::domain::build::BuildArtifact;
use crate::domain::container::EngineError;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Git access used by the webhook consumer and the build service
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn clone_repository(&self, clone_url: &str, destination: &Path) -> Result<()>;

    /// Commit hash of HEAD for the repository at `directory`
    async fn head_commit(&self, directory: &Path) -> Result<String>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the context directory as `<repository>:<tag>` and `<repository>:latest`
    async fn build_image(
        &self,
        context_dir: &Path,
        repository: &str,
        tag: &str,
        builder_args: &str,
    ) -> Result<(), EngineError>;

    async fn push_image(&self, repository: &str, tag: &str, registry_auth: &str) -> Result<(), EngineError>;
}

/// Builds and publishes the project checked out in a directory.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    async fn build_in_dir(&self, directory: &Path, config_file: &str) -> Result<BuildArtifact>;
}
