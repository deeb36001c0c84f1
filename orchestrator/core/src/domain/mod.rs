// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects and the ports implemented by the
//! infrastructure layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Depends on:** nothing outside `crate::domain`

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod events;
pub mod execution;
pub mod invocation;
pub mod knowledge;
pub mod lease;
pub mod notification;
pub mod policy;
pub mod queue;
pub mod repository;
pub mod task;
pub mod telemetry;
pub mod workflow;
