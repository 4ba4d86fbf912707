// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Identity Core
//!
//! Membership authorization and cross-aggregate consistency for Users,
//! Teams and Organizations.
//!
//! # Architecture
//!
//! - **domain:** aggregates, role policy engine, events, repository contracts
//! - **application:** membership synchronizer, event publisher/subscriber, service facades
//! - **infrastructure:** in-memory and PostgreSQL stores, message bus, event consumer

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
