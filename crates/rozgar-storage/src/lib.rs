//! Durable keyed storage for statistics records and generated explanations.
//!
//! Both stores rely on a uniqueness constraint over the entity's natural key
//! rather than on callers checking before writing.

mod memory;
mod postgres;

use async_trait::async_trait;
use rozgar_core::{
    Explanation, ExplanationKey, NewExplanation, NewStatRecord, Page, StatFilter, StatKey,
    StatRecord,
};
use thiserror::Error;

pub use memory::{MemoryExplanationCache, MemoryRecordStore};
pub use postgres::{connect, run_migrations, PgExplanationCache, PgRecordStore};

pub const CRATE_NAME: &str = "rozgar-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(StatRecord),
    /// A row with the same natural key already existed; nothing was written.
    Duplicate,
}

impl InsertOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub records: Vec<StatRecord>,
    pub total: u64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_key(&self, key: &StatKey) -> Result<Option<StatRecord>, StoreError>;

    /// Insert unless a record with the same natural key exists. Never overwrites.
    async fn insert_if_absent(&self, record: NewStatRecord) -> Result<InsertOutcome, StoreError>;

    /// Matching records, newest first, plus the unpaginated match count.
    async fn query(&self, filter: &StatFilter, page: Page) -> Result<QueryPage, StoreError>;
}

#[async_trait]
pub trait ExplanationCache: Send + Sync {
    async fn find_by_key(&self, key: &ExplanationKey) -> Result<Option<Explanation>, StoreError>;

    /// Fails with [`StoreError::DuplicateKey`] when the key is already stored.
    async fn insert(&self, explanation: NewExplanation) -> Result<Explanation, StoreError>;
}

pub(crate) fn describe_stat_key(key: &StatKey) -> String {
    format!("{}/{}/{}", key.region_code, key.fiscal_year, key.month)
}

pub(crate) fn describe_explanation_key(key: &ExplanationKey) -> String {
    format!(
        "{}/{}/{}/{}",
        key.region_code, key.fiscal_year, key.month, key.language
    )
}
