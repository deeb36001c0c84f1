// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Specialized Agents
//!
//! The five roles of the agent pool. Each agent is stateless per invocation:
//! everything it needs arrives in the [`AgentContext`](crate::domain::agent::AgentContext)
//! and everything it produces leaves through the returned outcome, except the
//! Surgeon (which acts only through the execution gateway) and the Clerk
//! (which writes the task's historical case and notifies stakeholders).
//!
//! | Agent | Invoked by | Artifact |
//! |-------|------------|----------|
//! | [`Sentinel`] | `SentinelMonitor` on an interval | `Triggers` |
//! | [`Investigator`] | coordinator, `Investigating` | `RootCause` |
//! | [`Surgeon`] | coordinator, `Remediating` | `Remediation` |
//! | [`Analyst`] | `AnalystScheduler` on an interval | `Findings` |
//! | [`Clerk`] | coordinator, on terminal states | `IncidentSummary` |

pub mod analyst;
pub mod clerk;
pub mod investigator;
pub mod sentinel;
pub mod surgeon;

pub use analyst::Analyst;
pub use clerk::Clerk;
pub use investigator::Investigator;
pub use sentinel::Sentinel;
pub use surgeon::Surgeon;
