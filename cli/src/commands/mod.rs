// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for VIGIL CLI

pub mod config;
pub mod daemon;
pub mod db;
pub mod knowledge;
pub mod task;
pub mod trigger;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::db::DbCommand;
pub use self::knowledge::KnowledgeCommand;
pub use self::task::TaskCommand;
pub use self::trigger::TriggerArgs;
