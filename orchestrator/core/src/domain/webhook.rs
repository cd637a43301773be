// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Allow-list entry matching every repository
pub const WILDCARD_REPOSITORY: &str = "*";

/// Only this `X-GitHub-Event` value triggers a build
pub const PUSH_EVENT: &str = "push";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRepository {
    pub clone_url: String,
    pub full_name: String,
}

/// The subset of a push notification the build needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository: PushRepository,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// Refs that may trigger builds, per repository full name or `*`.
///
/// Loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedRefs(HashMap<String, Vec<String>>);

#[derive(Debug, Error)]
pub enum AllowedRefsError {
    #[error("Failed to read allowed refs file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Allowed refs file is not a JSON object of ref arrays: {0}")]
    Parse(#[from] serde_json::Error),
}

impl AllowedRefs {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self(entries)
    }

    pub fn from_json_str(json: &str) -> Result<Self, AllowedRefsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AllowedRefsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| AllowedRefsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// True when the ref is listed for the exact repository or for `*`
    pub fn is_allowed(&self, full_name: &str, git_ref: &str) -> bool {
        [full_name, WILDCARD_REPOSITORY]
            .iter()
            .filter_map(|repo| self.0.get(*repo))
            .any(|refs| refs.iter().any(|allowed| allowed == git_ref))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reasons an inbound webhook request is rejected before it is queued.
#[derive(Debug, Error)]
pub enum WebhookRejection {
    #[error("Method {0} is not allowed")]
    MethodNotAllowed(String),

    #[error("Request body could not be read or parsed: {0}")]
    UnreadableBody(String),

    #[error("Ref {git_ref} is not allow-listed for {repository}")]
    RefNotAuthorized { repository: String, git_ref: String },

    #[error("Event type '{0}' is not a push")]
    BadEventType(String),

    #[error("Build queue is full")]
    QueueFull,

    #[error("Build queue is closed")]
    QueueClosed,
}

impl WebhookRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnreadableBody(_) | Self::QueueClosed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RefNotAuthorized { .. } => StatusCode::FORBIDDEN,
            Self::BadEventType(_) => StatusCode::BAD_REQUEST,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::UnreadableBody(_) => "unreadable_body",
            Self::RefNotAuthorized { .. } => "ref_not_authorized",
            Self::BadEventType(_) => "bad_event_type",
            Self::QueueFull => "queue_full",
            Self::QueueClosed => "queue_closed",
        }
    }
}
