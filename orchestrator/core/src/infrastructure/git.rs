// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::pipeline::SourceRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::Repository;
use std::path::Path;
use tracing::info;

/// libgit2-backed checkout. All git work runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct GitSource;

impl GitSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceRepository for GitSource {
    async fn clone_repository(&self, clone_url: &str, destination: &Path) -> Result<()> {
        let url = clone_url.to_string();
        let dest = destination.to_path_buf();
        info!(url = %url, dest = %dest.display(), "Cloning repository");

        tokio::task::spawn_blocking(move || {
            Repository::clone(&url, &dest)
                .map(|_| ())
                .with_context(|| format!("failed to clone {}", url))
        })
        .await
        .context("clone task failed")?
    }

    async fn head_commit(&self, directory: &Path) -> Result<String> {
        let dir = directory.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let repo = Repository::open(&dir)
                .with_context(|| format!("cannot build - {} is not a git repo", dir.display()))?;
            let head = repo.head().context("cannot build - could not get head")?;
            let commit = head.peel_to_commit().context("cannot build - head is not a commit")?;
            Ok(commit.id().to_string())
        })
        .await
        .context("git task failed")?
    }
}
