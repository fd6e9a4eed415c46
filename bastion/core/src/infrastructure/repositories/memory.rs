// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::credential::{CredentialRecord, ProviderId, RecordRevision};
use crate::domain::repository::{CredentialRepository, RepositoryError};

#[derive(Clone, Default)]
pub struct InMemoryCredentialRepository {
    records: Arc<RwLock<HashMap<ProviderId, CredentialRecord>>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record unconditionally. Tests use it to simulate another
    /// process writing to shared storage, or on-disk corruption.
    pub fn overwrite(&self, record: CredentialRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.provider.clone(), record);
        }
    }
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Unknown("credential store lock poisoned".to_string())
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn find(&self, provider: &ProviderId) -> Result<Option<CredentialRecord>, RepositoryError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(provider).cloned())
    }

    async fn revision(&self, provider: &ProviderId) -> Result<Option<RecordRevision>, RepositoryError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(provider).map(RecordRevision::from))
    }

    async fn insert(&self, record: &CredentialRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.provider) {
            return Err(RepositoryError::Conflict(format!(
                "credential for {} already exists",
                record.provider
            )));
        }
        records.insert(record.provider.clone(), record.clone());
        Ok(())
    }

    async fn update_if(
        &self,
        expected: RecordRevision,
        record: &CredentialRecord,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().map_err(poisoned)?;
        match records.get(&record.provider) {
            Some(current) if RecordRevision::from(current) == expected => {
                records.insert(record.provider.clone(), record.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(record.provider.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<CredentialRecord>, RepositoryError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut all: Vec<CredentialRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(all)
    }
}
