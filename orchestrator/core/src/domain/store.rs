// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// A single key change delivered by a prefix watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    pub value: String,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, StoreError>> + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to coordination store: {0}")]
    Connection(String),
    #[error("Coordination store request failed: {0}")]
    Request(String),
    #[error("Watch stream failed: {0}")]
    Watch(String),
}

/// Distributed key/value store with prefix reads and prefix watches.
///
/// Implementations must be safe for concurrent use. Change events for one
/// watcher arrive in store-write order, and the subscription is released when
/// the returned stream is dropped.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write every entry in one atomic batch.
    async fn put_all(&self, entries: Vec<KeyValue>) -> Result<(), StoreError>;

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError>;
}

/// Failures of the build event store (publish, fetch and watch).
#[derive(Debug, Error)]
pub enum BuildStoreError {
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Build '{project}' is incomplete: missing field '{field}'")]
    IncompleteArtifact { project: String, field: &'static str },

    #[error("Build '{project}' has a malformed '{field}' field: {reason}")]
    MalformedField {
        project: String,
        field: &'static str,
        reason: String,
    },
}
