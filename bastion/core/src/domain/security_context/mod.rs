// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Context Domain Module
//!
//! Defines the **request-level** permission boundary. A [`SecurityContext`] is
//! derived from a verified session proof and threaded explicitly through every
//! operation that touches tenant data or vaulted credentials.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`capability`] | `Capability` value object and pattern matching |
//! | [`security_context`] | `SecurityContext`, `SessionClaims`, `AuthError` |
//! | [`repository`] | `SessionActivityRepository` last-seen audit trait |
//!
//! There is no ambient context: nothing in the crate stores a context in
//! shared state, and contexts are neither `Clone` nor `Default`.

pub mod capability;
pub mod repository;
pub mod security_context;

pub use capability::Capability;
pub use repository::SessionActivityRepository;
pub use security_context::{AuthError, SecurityContext, SessionClaims, SessionProof, SessionProofVerifier};
