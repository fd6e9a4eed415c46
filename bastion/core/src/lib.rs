// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bastion Core
//!
//! Tenant isolation and credential brokering for the bastion financial platform.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Every database statement runs inside a tenant-scoped
//!   transaction, and every partner API call is signed with vaulted
//!   credentials that never leave the vault boundary.
//!
//! ```text
//! AccessGuard ─► SecurityContextManager ─► (application handler)
//!                                             ├─► TenantScopedExecutor ─► ScopedTransaction
//!                                             └─► OutboundProxy ─► CredentialVault
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
