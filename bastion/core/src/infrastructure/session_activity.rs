// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::security_context::SessionActivityRepository;
use crate::domain::tenant::{SessionId, TenantId};

/// Last-seen timestamps held in process memory. Kept apart from the ledger
/// database on purpose: building a context never touches tenant storage.
#[derive(Default)]
pub struct InMemorySessionActivityRepository {
    seen: DashMap<SessionId, (TenantId, DateTime<Utc>)>,
}

impl InMemorySessionActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.seen.len()
    }
}

#[async_trait]
impl SessionActivityRepository for InMemorySessionActivityRepository {
    async fn record_seen(&self, session_id: SessionId, tenant_id: TenantId, at: DateTime<Utc>) -> Result<()> {
        self.seen
            .entry(session_id)
            .and_modify(|(_, last)| {
                if at > *last {
                    *last = at;
                }
            })
            .or_insert((tenant_id, at));
        Ok(())
    }

    async fn last_seen(&self, session_id: &SessionId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.seen.get(session_id).map(|entry| entry.value().1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_seen_only_moves_forward() {
        let repo = InMemorySessionActivityRepository::new();
        let session = SessionId::new();
        let tenant = TenantId::new();
        let t0 = Utc::now();

        repo.record_seen(session, tenant, t0).await.unwrap();
        repo.record_seen(session, tenant, t0 - chrono::Duration::seconds(5)).await.unwrap();
        assert_eq!(repo.last_seen(&session).await.unwrap(), Some(t0));
        assert_eq!(repo.tracked_sessions(), 1);
    }
}
