use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rozgar_core::RawRecord;

use crate::{AdapterError, SourceQuery, SourceResponse, StatisticsSource};

const UPSTREAM: &str = "fixture";

/// Read a captured statistics-source response from disk.
pub fn load_fixture_response(path: impl AsRef<Path>) -> Result<SourceResponse> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Offline statistics source serving a captured response.
///
/// Applies the same uppercase equality matching the live source does, and
/// counts calls so callers can tell whether the source was consulted.
#[derive(Debug)]
pub struct FixtureStatisticsSource {
    response: SourceResponse,
    calls: AtomicUsize,
}

impl FixtureStatisticsSource {
    pub fn new(response: SourceResponse) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_records(records: Vec<RawRecord>) -> Self {
        Self::new(SourceResponse {
            status: Some("ok".to_string()),
            message: None,
            records: Some(records),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_fixture_response(path)?))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatisticsSource for FixtureStatisticsSource {
    fn source_id(&self) -> &'static str {
        UPSTREAM
    }

    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let filters = query.filters();
        let records = self.response.clone().into_records(UPSTREAM)?;
        Ok(records
            .into_iter()
            .filter(|record| {
                filters.iter().all(|(field, expected)| {
                    record
                        .text(field)
                        .is_some_and(|value| value.to_uppercase() == *expected)
                })
            })
            .collect())
    }
}
