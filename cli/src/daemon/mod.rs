// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Long-running service mode

pub mod server;

pub use server::start_daemon;
