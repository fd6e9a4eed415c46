// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Request-path services built on the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates context building, scoped execution, the
//!   credential vault and outbound signing

pub mod access_guard;
pub mod context_manager;
pub mod credential_vault;
pub mod outbound_proxy;
pub mod query_executor;

pub use access_guard::{AccessGuard, Admission};
pub use context_manager::SecurityContextManager;
pub use credential_vault::{CredentialVault, RotationAck};
pub use outbound_proxy::OutboundProxy;
pub use query_executor::TenantScopedExecutor;
