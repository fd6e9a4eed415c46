// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod crypto;
pub mod db;
pub mod repositories;
pub mod scoped_storage;
pub mod session_activity;
pub mod session_token;
pub mod signing;

pub use audit::{SecurityAuditLogger, SecurityIncident};
pub use crypto::MasterKey;
pub use session_token::{JwtSessionIssuer, JwtSessionVerifier};
