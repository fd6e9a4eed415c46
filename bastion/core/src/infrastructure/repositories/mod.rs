// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions defined in
//! [`crate::domain::repository`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve vaulted credential records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresCredentialRepository** - `provider_credentials` table, compare-and-swap updates
//! - **InMemoryCredentialRepository** - thread-safe HashMap-backed storage for tests and local runs

pub mod memory;
pub mod postgres_credential;

pub use memory::InMemoryCredentialRepository;
pub use postgres_credential::PostgresCredentialRepository;
