// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the identity CLI

pub mod config;
pub mod migrate;

pub use self::config::ConfigCommand;
pub use self::migrate::MigrateCommand;
