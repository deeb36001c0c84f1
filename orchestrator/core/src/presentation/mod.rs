// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`vigil-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. No business logic lives here: ingestion goes through the
//! [`EventIngress`](crate::application::EventIngress), cancellation through the
//! [`WorkflowCoordinator`](crate::application::WorkflowCoordinator) and
//! inspection reads the repositories directly.

pub mod api;

pub use api::{router, ApiError, ApiState};
