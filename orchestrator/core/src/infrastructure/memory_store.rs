// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Coordination Store
//
// Single-process stand-in for etcd built on a tokio broadcast channel.
// Used by tests and by single-node development setups where the webhook
// server and the agent share one process. State is lost on restart.

use crate::domain::store::{
    CoordinationStore, KeyValue, StoreError, WatchEvent, WatchEventKind, WatchStream,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct InMemoryCoordinationStore {
    entries: Mutex<BTreeMap<String, String>>,
    sender: broadcast::Sender<WatchEvent>,
}

impl InMemoryCoordinationStore {
    /// Capacity bounds how many change events a slow watcher may fall behind by
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            sender,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Remove a single key, notifying watchers. Returns whether the key existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let existed = entries.remove(key).is_some();
        if existed {
            self.notify(WatchEvent {
                kind: WatchEventKind::Delete,
                key: key.to_string(),
                value: String::new(),
            });
        }
        existed
    }

    pub fn watcher_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn notify(&self, event: WatchEvent) {
        if self.sender.send(event).is_err() {
            debug!("No watchers listening to store change");
        }
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn put_all(&self, entries: Vec<KeyValue>) -> Result<(), StoreError> {
        // Events are sent while the lock is held so every watcher sees
        // concurrent batches in the same order they were applied.
        let mut stored = self.entries.lock();
        for entry in entries {
            stored.insert(entry.key.clone(), entry.value.clone());
            self.notify(WatchEvent {
                kind: WatchEventKind::Put,
                key: entry.key,
                value: entry.value,
            });
        }
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let stored = self.entries.lock();
        Ok(stored
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let receiver = self.sender.subscribe();
        let prefix = prefix.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let prefix = prefix.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.key.starts_with(&prefix) => return Some((Ok(event), receiver)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // Dropped changes are lost; the watcher resumes at the oldest retained one
                            warn!(skipped = n, prefix = %prefix, "Store watcher lagged, skipping changes");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
