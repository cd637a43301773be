// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod build_event_store;
pub mod build_service;
pub mod reconciler;
pub mod webhook;

pub use agent::Agent;
pub use build_event_store::{BuildEventStore, DeliveryMode};
pub use build_service::BuildService;
pub use reconciler::ContainerReconciler;
pub use webhook::{BuildQueueProcessor, WebhookIngestor};
