// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod etcd;
pub mod git;
pub mod memory_store;
pub mod runtime;

pub use etcd::EtcdCoordinationStore;
pub use git::GitSource;
pub use memory_store::InMemoryCoordinationStore;
pub use runtime::DockerEngine;
