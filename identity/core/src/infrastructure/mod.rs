// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure Layer
//!
//! Aggregate stores (in-memory and PostgreSQL) and the message transport.

pub mod event_bus;
pub mod event_consumer;
pub mod repositories;
