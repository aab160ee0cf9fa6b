use std::sync::Arc;

use rozgar_adapters::{SourceQuery, StatisticsSource};
use rozgar_core::{normalize_record, NormalizeError, Page, RawRecord, StatFilter, StatRecord};
use rozgar_storage::{InsertOutcome, QueryPage, RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::SyncError;

/// Inbound statistics request. Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default, alias = "fin_year")]
    pub fiscal_year: Option<String>,
    #[serde(default, alias = "district_name")]
    pub region_name: Option<String>,
    #[serde(default, alias = "district_code")]
    pub region_code: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
}

#[derive(Debug, Clone)]
struct ValidRequest {
    state_name: String,
    fiscal_year: String,
    region_name: Option<String>,
    region_code: Option<String>,
    month: Option<String>,
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

impl StatRequest {
    fn validate(&self) -> Result<ValidRequest, SyncError> {
        match (present(&self.state_name), present(&self.fiscal_year)) {
            (Some(state_name), Some(fiscal_year)) => Ok(ValidRequest {
                state_name,
                fiscal_year,
                region_name: present(&self.region_name),
                region_code: present(&self.region_code),
                month: present(&self.month),
            }),
            _ => Err(SyncError::Validation(
                "Missing required parameters: state_name and fin_year are required".to_string(),
            )),
        }
    }
}

impl ValidRequest {
    fn source_query(&self) -> SourceQuery {
        SourceQuery {
            state_name: self.state_name.clone(),
            fiscal_year: self.fiscal_year.clone(),
            region_name: self.region_name.clone(),
            region_code: self.region_code.clone(),
        }
    }

    fn filter(&self) -> StatFilter {
        StatFilter {
            state_name: Some(self.state_name.clone()),
            fiscal_year: Some(self.fiscal_year.clone()),
            region_name: self.region_name.clone(),
            region_code: self.region_code.clone(),
            month: self.month.clone(),
            ..Default::default()
        }
    }
}

/// Where the rows of a [`StatLookup`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Database,
    Source,
}

/// Per-batch persistence counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub saved: usize,
    pub skipped: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSummary {
    pub counts: BatchCounts,
    pub total: usize,
    pub data: Vec<RawRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatLookup {
    pub source: Provenance,
    pub records: Vec<StatRecord>,
    /// Present only when the source was consulted.
    pub counts: Option<BatchCounts>,
}

#[derive(Debug, Error)]
enum RecordError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum RecordOutcome {
    Saved,
    Skipped,
}

pub struct SyncOrchestrator {
    store: Arc<dyn RecordStore>,
    source: Arc<dyn StatisticsSource>,
    page_limit: usize,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, source: Arc<dyn StatisticsSource>) -> Self {
        Self {
            store,
            source,
            page_limit: Page::DEFAULT_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Pull the year's records from the source and persist the new ones.
    pub async fn fetch_and_persist(
        &self,
        request: &StatRequest,
    ) -> Result<FetchSummary, SyncError> {
        let request = request.validate()?;
        let records = self.fetch_filtered(&request).await?;
        let counts = self.persist_batch(&records).await;
        Ok(FetchSummary {
            counts,
            total: records.len(),
            data: records,
        })
    }

    /// Serve from the store when it already holds matching rows, otherwise
    /// fetch, persist and serve what was stored.
    pub async fn get_or_fetch(&self, request: &StatRequest) -> Result<StatLookup, SyncError> {
        let request = request.validate()?;
        let filter = request.filter();
        let page = Page {
            limit: self.page_limit,
            offset: 0,
        };

        let existing = self.store.query(&filter, page).await?;
        if !existing.records.is_empty() {
            info!(
                state = %request.state_name,
                fiscal_year = %request.fiscal_year,
                records = existing.records.len(),
                "serving statistics from store"
            );
            return Ok(StatLookup {
                source: Provenance::Database,
                records: existing.records,
                counts: None,
            });
        }

        let raw = self.fetch_filtered(&request).await?;
        let counts = self.persist_batch(&raw).await;

        let stored = self.store.query(&filter, page).await?;
        if stored.records.is_empty() {
            return Err(SyncError::NotFound(
                "No records found for the specified filters".to_string(),
            ));
        }
        Ok(StatLookup {
            source: Provenance::Source,
            records: stored.records,
            counts: Some(counts),
        })
    }

    pub async fn query(&self, filter: &StatFilter, page: Page) -> Result<QueryPage, SyncError> {
        Ok(self.store.query(filter, page).await?)
    }

    async fn fetch_filtered(&self, request: &ValidRequest) -> Result<Vec<RawRecord>, SyncError> {
        let records = self
            .source
            .fetch_records(&request.source_query())
            .await
            .map_err(|err| {
                warn!(source = self.source.source_id(), error = %err, "statistics source failed");
                SyncError::from(err)
            })?;
        if records.is_empty() {
            return Err(SyncError::NotFound(
                "No records found for the specified filters".to_string(),
            ));
        }

        let Some(month) = &request.month else {
            return Ok(records);
        };
        let filtered: Vec<RawRecord> = records
            .into_iter()
            .filter(|record| record.month().as_deref() == Some(month.as_str()))
            .collect();
        if filtered.is_empty() {
            return Err(SyncError::NotFound(format!(
                "No records found for the month: {month}"
            )));
        }
        Ok(filtered)
    }

    async fn persist_batch(&self, records: &[RawRecord]) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for (index, raw) in records.iter().enumerate() {
            match self.persist_one(raw).await {
                Ok(RecordOutcome::Saved) => counts.saved += 1,
                Ok(RecordOutcome::Skipped) => counts.skipped += 1,
                Err(err) => {
                    counts.errored += 1;
                    warn!(
                        index,
                        district_code = raw.text("district_code").as_deref().unwrap_or("?"),
                        month = raw.month().as_deref().unwrap_or("?"),
                        error = %err,
                        "failed to persist statistics record"
                    );
                }
            }
        }
        info!(
            saved = counts.saved,
            skipped = counts.skipped,
            errored = counts.errored,
            "persisted statistics batch"
        );
        counts
    }

    async fn persist_one(&self, raw: &RawRecord) -> Result<RecordOutcome, RecordError> {
        let record = normalize_record(raw)?;
        if self.store.find_by_key(&record.key()).await?.is_some() {
            return Ok(RecordOutcome::Skipped);
        }
        Ok(match self.store.insert_if_absent(record).await? {
            InsertOutcome::Inserted(_) => RecordOutcome::Saved,
            InsertOutcome::Duplicate => RecordOutcome::Skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rozgar_adapters::{FixtureStatisticsSource, SourceResponse};
    use rozgar_core::{NewStatRecord, StatKey};
    use rozgar_storage::MemoryRecordStore;
    use serde_json::json;

    fn raw(district_code: &str, district_name: &str, month: &str) -> RawRecord {
        RawRecord::from(json!({
            "state_code": "27",
            "state_name": "MAHARASHTRA",
            "district_code": district_code,
            "district_name": district_name,
            "fin_year": "2024-2025",
            "month": month,
            "Total_Exp": "120.5",
            "Women_Persondays": 310,
            "Remarks": "",
        }))
    }

    fn pune_year() -> Vec<RawRecord> {
        vec![
            raw("2725", "PUNE", "April"),
            raw("2725", "PUNE", "May"),
            raw("2725", "PUNE", "June"),
        ]
    }

    fn request(month: Option<&str>) -> StatRequest {
        StatRequest {
            state_name: Some("Maharashtra".into()),
            fiscal_year: Some("2024-2025".into()),
            region_name: Some("Pune".into()),
            month: month.map(Into::into),
            ..Default::default()
        }
    }

    /// Counts every store call and can hide existing rows from `find_by_key`.
    #[derive(Default)]
    struct ProbeStore {
        inner: MemoryRecordStore,
        calls: AtomicUsize,
        blind_lookups: bool,
    }

    #[async_trait]
    impl RecordStore for ProbeStore {
        async fn find_by_key(&self, key: &StatKey) -> Result<Option<StatRecord>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.blind_lookups {
                return Ok(None);
            }
            self.inner.find_by_key(key).await
        }

        async fn insert_if_absent(
            &self,
            record: NewStatRecord,
        ) -> Result<InsertOutcome, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.insert_if_absent(record).await
        }

        async fn query(&self, filter: &StatFilter, page: Page) -> Result<QueryPage, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.query(filter, page).await
        }
    }

    #[tokio::test]
    async fn repeated_fetch_saves_once_then_skips() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store.clone(), source);

        let first = sync.fetch_and_persist(&request(None)).await.expect("first");
        assert_eq!(
            first.counts,
            BatchCounts {
                saved: 3,
                skipped: 0,
                errored: 0
            }
        );
        assert_eq!(first.total, 3);

        let second = sync.fetch_and_persist(&request(None)).await.expect("second");
        assert_eq!(second.counts.saved, 0);
        assert_eq!(second.counts.skipped, 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn insert_conflict_after_missed_lookup_counts_as_skip() {
        let store = Arc::new(ProbeStore {
            blind_lookups: true,
            ..Default::default()
        });
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store.clone(), source);

        sync.fetch_and_persist(&request(None)).await.expect("first");
        let second = sync.fetch_and_persist(&request(None)).await.expect("second");
        assert_eq!(second.counts.skipped, 3);
        assert_eq!(second.counts.errored, 0);
        assert_eq!(store.inner.len().await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_store_each_key_once() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = Arc::new(SyncOrchestrator::new(store.clone(), source));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let sync = sync.clone();
            tasks.spawn(async move { sync.fetch_and_persist(&request(None)).await });
        }
        let mut saved = 0;
        while let Some(joined) = tasks.join_next().await {
            let summary = joined.expect("task").expect("summary");
            assert_eq!(summary.counts.errored, 0);
            saved += summary.counts.saved;
        }
        assert_eq!(saved, 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn month_filter_keeps_only_that_month() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store.clone(), source);

        let summary = sync
            .fetch_and_persist(&request(Some("May")))
            .await
            .expect("summary");
        assert_eq!(summary.total, 1);
        assert_eq!(summary.data[0].month().as_deref(), Some("May"));
        assert_eq!(summary.counts.saved, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn absent_month_is_not_found() {
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(Arc::new(MemoryRecordStore::new()), source);

        match sync.fetch_and_persist(&request(Some("March"))).await {
            Err(SyncError::NotFound(message)) => assert!(message.contains("March")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            sync.get_or_fetch(&request(Some("March"))).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_parameters_touch_neither_store_nor_source() {
        let store = Arc::new(ProbeStore::default());
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store.clone(), source.clone());

        let mut no_year = request(None);
        no_year.fiscal_year = Some("   ".into());
        assert!(matches!(
            sync.get_or_fetch(&no_year).await,
            Err(SyncError::Validation(_))
        ));
        let mut no_state = request(None);
        no_state.state_name = None;
        assert!(matches!(
            sync.fetch_and_persist(&no_state).await,
            Err(SyncError::Validation(_))
        ));

        assert_eq!(source.calls(), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stored_rows_are_served_without_calling_source() {
        let store = Arc::new(MemoryRecordStore::new());
        let seeding = SyncOrchestrator::new(
            store.clone(),
            Arc::new(FixtureStatisticsSource::from_records(pune_year())),
        );
        seeding.fetch_and_persist(&request(None)).await.expect("seed");

        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store, source.clone());
        let lookup = sync.get_or_fetch(&request(Some("June"))).await.expect("lookup");

        assert_eq!(lookup.source, Provenance::Database);
        assert_eq!(lookup.records.len(), 1);
        assert_eq!(lookup.records[0].record.month, "June");
        assert!(lookup.counts.is_none());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn miss_fetches_persists_and_serves_stored_rows() {
        let store = Arc::new(MemoryRecordStore::new());
        let source = Arc::new(FixtureStatisticsSource::from_records(pune_year()));
        let sync = SyncOrchestrator::new(store, source.clone());

        let lookup = sync.get_or_fetch(&request(None)).await.expect("lookup");
        assert_eq!(lookup.source, Provenance::Source);
        assert_eq!(lookup.records.len(), 3);
        assert_eq!(lookup.counts.map(|c| c.saved), Some(3));
        assert_eq!(lookup.records[0].record.metrics.total_exp, 120.5);
        assert_eq!(lookup.records[0].record.remarks, "NA");

        let again = sync.get_or_fetch(&request(None)).await.expect("again");
        assert_eq!(again.source, Provenance::Database);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_records_are_counted_and_the_batch_continues() {
        let mut records = pune_year();
        let mut broken = raw("", "PUNE", "July");
        broken.0.remove("district_code");
        records.insert(1, broken);
        let sync = SyncOrchestrator::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(FixtureStatisticsSource::from_records(records)),
        );

        let summary = sync.fetch_and_persist(&request(None)).await.expect("summary");
        assert_eq!(summary.total, 4);
        assert_eq!(
            summary.counts,
            BatchCounts {
                saved: 3,
                skipped: 0,
                errored: 1
            }
        );
    }

    #[tokio::test]
    async fn source_failure_is_upstream_error() {
        let source = Arc::new(FixtureStatisticsSource::new(SourceResponse {
            status: Some("error".into()),
            message: Some("Invalid API key".into()),
            records: None,
        }));
        let sync = SyncOrchestrator::new(Arc::new(MemoryRecordStore::new()), source);
        assert!(matches!(
            sync.fetch_and_persist(&request(None)).await,
            Err(SyncError::Upstream(_))
        ));
    }

    #[test]
    fn request_accepts_source_field_aliases() {
        let request: StatRequest = serde_json::from_value(json!({
            "state_name": "Kerala",
            "fin_year": "2024-2025",
            "district_name": "Idukki",
            "district_code": "3206"
        }))
        .expect("request");
        assert_eq!(request.fiscal_year.as_deref(), Some("2024-2025"));
        assert_eq!(request.region_name.as_deref(), Some("Idukki"));
        assert_eq!(request.region_code.as_deref(), Some("3206"));
    }
}
