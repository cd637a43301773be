// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`echo-core`)
//!
//! HTTP surface of the webhook server. Requests are validated and handed to
//! [`crate::application::webhook::WebhookIngestor`]; nothing here builds or
//! publishes.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`webhook_api`] | HTTP (Axum) | `POST /hook` push receiver and `GET /health` |

pub mod webhook_api;
