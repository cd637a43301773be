// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! etcd-backed coordination store.
//!
//! Batches are committed through a single etcd transaction, so every key in a
//! batch shares one revision and watchers never observe half of a publish.

use crate::domain::store::{
    CoordinationStore, KeyValue, StoreError, WatchEvent, WatchEventKind, WatchStream,
};
use async_trait::async_trait;
use etcd_client::{
    Client, EventType, GetOptions, Txn, TxnOp, WatchOptions, WatchStream as EtcdWatchStream, Watcher,
};
use std::collections::VecDeque;
use tracing::{debug, info};

#[derive(Clone)]
pub struct EtcdCoordinationStore {
    client: Client,
}

type WatchState = (Watcher, EtcdWatchStream, VecDeque<WatchEvent>);

impl EtcdCoordinationStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None).await.map_err(|e| {
            StoreError::Connection(format!("{} (endpoints: {})", e, endpoints.join(", ")))
        })?;

        info!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self { client })
    }
}

fn to_watch_event(event: &etcd_client::Event) -> Option<WatchEvent> {
    let kv = event.kv()?;
    let key = kv.key_str().ok()?.to_string();
    let value = kv.value_str().map(str::to_string).unwrap_or_default();
    let kind = match event.event_type() {
        EventType::Put => WatchEventKind::Put,
        EventType::Delete => WatchEventKind::Delete,
    };
    Some(WatchEvent { kind, key, value })
}

#[async_trait]
impl CoordinationStore for EtcdCoordinationStore {
    async fn put_all(&self, entries: Vec<KeyValue>) -> Result<(), StoreError> {
        let operations: Vec<TxnOp> = entries
            .into_iter()
            .map(|entry| TxnOp::put(entry.key, entry.value, None))
            .collect();

        let mut client = self.client.clone();
        client
            .txn(Txn::new().and_then(operations))
            .await
            .map_err(|e| StoreError::Request(format!("transactional put failed: {}", e)))?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Request(format!("failed to query {}: {}", prefix, e)))?;

        response
            .kvs()
            .iter()
            .map(|kv| {
                let key = kv.key_str().map_err(|e| StoreError::Request(e.to_string()))?;
                let value = kv.value_str().map_err(|e| StoreError::Request(e.to_string()))?;
                Ok(KeyValue::new(key, value))
            })
            .collect()
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| StoreError::Watch(format!("failed to watch {}: {}", prefix, e)))?;

        debug!(prefix, watch_id = watcher.watch_id(), "Opened etcd watch");

        // The watcher is carried in the stream state: dropping the stream
        // drops it and ends the subscription.
        let initial: Option<WatchState> = Some((watcher, stream, VecDeque::new()));
        let events = futures::stream::unfold(initial, |state| async move {
            let (watcher, mut stream, mut pending) = state?;
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), Some((watcher, stream, pending))));
                }

                match stream.message().await {
                    Ok(Some(response)) => {
                        if response.canceled() {
                            return Some((
                                Err(StoreError::Watch("watch cancelled by server".to_string())),
                                None,
                            ));
                        }
                        pending.extend(response.events().iter().filter_map(to_watch_event));
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(StoreError::Watch(e.to_string())), None)),
                }
            }
        });

        Ok(Box::pin(events))
    }
}
