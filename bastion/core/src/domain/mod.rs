// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, aggregates and persistence contracts shared by every layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Implements the bastion security model

pub mod config;
pub mod credential;
pub mod guard;
pub mod ledger;
pub mod outbound;
pub mod rate_limit;
pub mod repository;
pub mod scoping;
pub mod security_context;
pub mod tenant;
