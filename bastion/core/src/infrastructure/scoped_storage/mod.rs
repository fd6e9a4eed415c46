// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scoped storage backends
//!
//! Implementations of [`crate::domain::scoping::TransactionSource`]:
//!
//! - **PgTransactionSource** - PostgreSQL, scope via `set_config(..., true)`
//! - **InMemoryScopedStore** - deterministic backend for tests and local runs

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryConnection, InMemoryScopedStore, ScopeReset};
pub use postgres::{PgTenantConnection, PgTransactionSource};
