// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`bastion-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. Every route except `/health` passes the
//! [`crate::application::AccessGuard`] first and hands the resulting
//! [`crate::domain::security_context::SecurityContext`] to the service by reference.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | Ledger endpoints and the partner call endpoint |

pub mod api;
