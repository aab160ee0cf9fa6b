use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rozgar_core::{
    Explanation, ExplanationKey, NewExplanation, NewStatRecord, Page, StatFilter, StatKey,
    StatRecord,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    describe_explanation_key, describe_stat_key, ExplanationCache, InsertOutcome, QueryPage,
    RecordStore, StoreError,
};

/// Process-local record store. Uniqueness is enforced under the write lock.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: RwLock<MemoryRecords>,
}

#[derive(Debug, Default)]
struct MemoryRecords {
    next_seq: u64,
    rows: HashMap<StatKey, (u64, StatRecord)>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_key(&self, key: &StatKey) -> Result<Option<StatRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(key)
            .map(|(_, record)| record.clone()))
    }

    async fn insert_if_absent(&self, record: NewStatRecord) -> Result<InsertOutcome, StoreError> {
        let key = record.key();
        let mut inner = self.inner.write().await;
        if inner.rows.contains_key(&key) {
            debug!(key = %describe_stat_key(&key), "stat record already stored");
            return Ok(InsertOutcome::Duplicate);
        }
        let stored = StatRecord {
            id: Uuid::new_v4(),
            record,
            created_at: Utc::now(),
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.insert(key, (seq, stored.clone()));
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn query(&self, filter: &StatFilter, page: Page) -> Result<QueryPage, StoreError> {
        let inner = self.inner.read().await;
        let mut matching = inner
            .rows
            .values()
            .filter(|(_, r)| filter.matches(&r.record))
            .collect::<Vec<_>>();
        matching.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|(_, r)| r.clone())
            .collect();
        Ok(QueryPage { records, total })
    }
}

/// Process-local explanation cache with the same duplicate-key contract as Postgres.
#[derive(Debug, Default)]
pub struct MemoryExplanationCache {
    rows: RwLock<HashMap<ExplanationKey, Explanation>>,
}

impl MemoryExplanationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ExplanationCache for MemoryExplanationCache {
    async fn find_by_key(&self, key: &ExplanationKey) -> Result<Option<Explanation>, StoreError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn insert(&self, explanation: NewExplanation) -> Result<Explanation, StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&explanation.key) {
            return Err(StoreError::DuplicateKey(describe_explanation_key(
                &explanation.key,
            )));
        }
        let stored = Explanation {
            id: Uuid::new_v4(),
            explanation,
            created_at: Utc::now(),
        };
        rows.insert(stored.key().clone(), stored.clone());
        Ok(stored)
    }
}
