// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! Use cases over the domain: the membership synchronizer, the event
//! publisher and subscriber, and the User / Organization / Team facades.

pub mod context;
pub mod error;
pub mod publisher;
pub mod synchronizer;
pub mod reconciler;
pub mod user_service;
pub mod organization_service;
pub mod team_service;
pub mod identity_subscriber;
pub mod services;
pub mod repository_factory;

#[cfg(test)]
pub(crate) mod testing;
