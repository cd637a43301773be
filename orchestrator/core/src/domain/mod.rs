// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Types and ports shared by every echo-cicd role.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Build descriptors, ports to the store, engine and build collaborators

pub mod build;
pub mod container;
pub mod deploy_config;
pub mod node_config;
pub mod pipeline;
pub mod store;
pub mod webhook;
