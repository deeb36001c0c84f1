// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # VIGIL core
//!
//! Multi-agent orchestration for SRE incident response. Triggers enter
//! through the event ingress, are queued by priority and driven by the
//! workflow coordinator through investigation, remediation and
//! verification. Every state-changing action goes through the execution
//! gateway; every outcome is written back to the knowledge store.
//!
//! # Architecture
//!
//! - [`domain`]: aggregates, value objects and ports
//! - [`application`]: coordinator, agent pool, agents, gateway, ingress
//! - [`infrastructure`]: PostgreSQL and in-memory stores, queue, telemetry,
//!   executors, notifiers, metrics
//! - [`presentation`]: HTTP API

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
