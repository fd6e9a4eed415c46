// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::tenant::{SessionId, TenantId};

/// Lightweight audit of session activity (last-seen timestamps).
///
/// Written by the context manager after a proof verifies; never consulted
/// for authorization decisions.
#[async_trait]
pub trait SessionActivityRepository: Send + Sync {
    async fn record_seen(&self, session_id: SessionId, tenant_id: TenantId, at: DateTime<Utc>) -> Result<()>;
    async fn last_seen(&self, session_id: &SessionId) -> Result<Option<DateTime<Utc>>>;
}
