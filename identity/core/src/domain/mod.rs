// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Aggregates, value objects and pure rules. No I/O.

pub mod user;
pub mod organization;
pub mod team;
pub mod membership;
pub mod policy;
pub mod events;
pub mod pagination;
pub mod repository;
pub mod identity_config;
