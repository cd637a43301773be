// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Build descriptors published into the coordination store.
//!
//! A [`BuildArtifact`] is everything an agent needs to run a deployable:
//! the image reference plus the [`ExecSpec`] describing how the container is
//! started. The build pipeline produces a [`PublishRequest`], which becomes an
//! artifact once it is stamped with its publication time.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Flat, key-safe identifier of a logical deployable.
///
/// Derived from the repository full name with every `/` replaced by `__`, so
/// `org/app` becomes `org__app` and occupies exactly one key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectKey(String);

impl ProjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Flatten a repository full name (`owner/name`) into a project key
    pub fn from_repository(full_name: &str) -> Self {
        Self(full_name.replace('/', "__"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host directory bound into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    #[serde(alias = "Host")]
    pub host: String,
    #[serde(rename = "bindTo", alias = "BindTo")]
    pub bind_to: String,
    #[serde(rename = "readonly", alias = "ReadOnly", default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// Docker bind string, `host:container` with `:ro` appended for read-only mounts
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host, self.bind_to);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Routing hint consumed by a downstream reverse proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainHint {
    pub host: String,
    pub port: u16,
}

/// How the container for a build is started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Appended to the image's default command, never replacing it
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,

    /// Container port (`8080` or `8080/udp`) to host port
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: BTreeMap<String, u16>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub volumes: Vec<VolumeMount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainHint>,
}

/// Empty collections may be written as `null` by other publishers
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ExecSpec {
    pub fn bind_mounts(&self) -> Vec<String> {
        self.volumes.iter().map(VolumeMount::to_bind).collect()
    }

    /// Port bindings keyed by `port/proto`, defaulting the protocol to tcp.
    pub fn published_ports(&self) -> BTreeMap<String, String> {
        self.ports
            .iter()
            .map(|(container, host)| {
                let key = if container.contains('/') {
                    container.clone()
                } else {
                    format!("{}/tcp", container)
                };
                (key, host.to_string())
            })
            .collect()
    }
}

/// Descriptor of a published build, as stored under its project key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub project_key: ProjectKey,
    pub display_name: String,
    /// Full name of the source repository (`owner/name`); empty when unknown
    #[serde(default)]
    pub repository: String,
    /// Commit hash the image was built from
    pub version_hash: String,
    /// Fully qualified image reference including tag
    pub image_reference: String,
    /// Registry the image was pushed to, empty when the image is local-only
    pub registry: String,
    pub published_at_millis: i64,
    pub exec_spec: ExecSpec,
}

/// A build result on its way into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub project_key: ProjectKey,
    pub display_name: String,
    pub repository: String,
    pub version_hash: String,
    pub image_reference: String,
    pub registry: String,
    pub exec_spec: ExecSpec,
}

impl PublishRequest {
    pub fn into_artifact(self, published_at_millis: i64) -> BuildArtifact {
        BuildArtifact {
            project_key: self.project_key,
            display_name: self.display_name,
            repository: self.repository,
            version_hash: self.version_hash,
            image_reference: self.image_reference,
            registry: self.registry,
            published_at_millis,
            exec_spec: self.exec_spec,
        }
    }

    /// Stamp the request with the current wall-clock time
    pub fn stamp_now(self) -> BuildArtifact {
        self.into_artifact(chrono::Utc::now().timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_key_flattens_repository_name() {
        assert_eq!(ProjectKey::from_repository("org/app").as_str(), "org__app");
        assert_eq!(ProjectKey::from_repository("plain").as_str(), "plain");
        assert_eq!(ProjectKey::from_repository("a/b/c").to_string(), "a__b__c");
    }

    #[test]
    fn test_bind_mounts_only_mark_read_only_volumes() {
        let exec = ExecSpec {
            volumes: vec![
                VolumeMount { host: "/srv/data".into(), bind_to: "/data".into(), read_only: false },
                VolumeMount { host: "/etc/app".into(), bind_to: "/config".into(), read_only: true },
            ],
            ..Default::default()
        };

        assert_eq!(exec.bind_mounts(), vec!["/srv/data:/data", "/etc/app:/config:ro"]);
    }

    #[test]
    fn test_published_ports_default_to_tcp() {
        let mut ports = BTreeMap::new();
        ports.insert("8080".to_string(), 80);
        ports.insert("53/udp".to_string(), 5353);
        let exec = ExecSpec { ports, ..Default::default() };

        let published = exec.published_ports();
        assert_eq!(published.get("8080/tcp").map(String::as_str), Some("80"));
        assert_eq!(published.get("53/udp").map(String::as_str), Some("5353"));
        assert_eq!(published.len(), 2);
    }

    #[test]
    fn test_exec_spec_json_uses_deploy_config_field_names() {
        let json = r#"{
            "args": ["--verbose"],
            "ports": {"8080": 80},
            "volumes": [{"host": "/a", "bindTo": "/b", "readonly": true}],
            "domain": {"host": "app.example.com", "port": 8080}
        }"#;

        let exec: ExecSpec = serde_json::from_str(json).unwrap();
        assert_eq!(exec.args, vec!["--verbose"]);
        assert!(exec.volumes[0].read_only);
        assert_eq!(exec.domain.as_ref().map(|d| d.port), Some(8080));
    }

    #[test]
    fn test_exec_spec_accepts_null_collections_and_capitalised_volume_keys() {
        let json = r#"{
            "args": null,
            "ports": null,
            "volumes": [{"Host": "/srv/data", "BindTo": "/data", "ReadOnly": true}],
            "domain": null
        }"#;

        let exec: ExecSpec = serde_json::from_str(json).unwrap();
        assert!(exec.args.is_empty());
        assert!(exec.ports.is_empty());
        assert!(exec.domain.is_none());
        assert_eq!(exec.bind_mounts(), vec!["/srv/data:/data:ro"]);

        let empty: ExecSpec = serde_json::from_str(r#"{"args":[],"ports":null,"volumes":null}"#).unwrap();
        assert_eq!(empty, ExecSpec::default());
    }

    #[test]
    fn test_publish_request_keeps_fields_when_stamped() {
        let request = PublishRequest {
            project_key: ProjectKey::new("org__app"),
            display_name: "app".into(),
            repository: "org/app".into(),
            version_hash: "abc123".into(),
            image_reference: "registry.local/app:abc123".into(),
            registry: "registry.local".into(),
            exec_spec: ExecSpec::default(),
        };

        let artifact = request.into_artifact(1_700_000_000_000);
        assert_eq!(artifact.published_at_millis, 1_700_000_000_000);
        assert_eq!(artifact.project_key.as_str(), "org__app");
        assert_eq!(artifact.image_reference, "registry.local/app:abc123");
    }
}
