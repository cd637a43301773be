// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # echo-core
//!
//! Build-publish / watch-reconcile coordination for echo-cicd.
//!
//! # Architecture
//!
//! - **domain:** build descriptors, store and engine ports, webhook rules, configuration
//! - **application:** build event store, reconciler, webhook ingestion, build service, agent
//! - **infrastructure:** etcd and in-memory stores, Docker engine, git source
//! - **presentation:** webhook HTTP router

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
