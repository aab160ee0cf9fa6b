//! Outbound collaborators: the statistics source and the explanation generator.

mod datagov;
mod fixture;
mod gemini;
mod http;

use async_trait::async_trait;
use rozgar_core::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use datagov::{DataGovConfig, DataGovStatisticsSource, DATA_GOV_DEFAULT_BASE_URL};
pub use fixture::{load_fixture_response, FixtureStatisticsSource};
pub use gemini::{
    GeminiConfig, GeminiGenerator, GEMINI_DEFAULT_BASE_URL, GEMINI_DEFAULT_MODEL,
    SYSTEM_INSTRUCTION,
};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};

pub const CRATE_NAME: &str = "rozgar-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{upstream} reported failure: {message}")]
    Upstream {
        upstream: &'static str,
        message: String,
    },
    #[error("malformed {upstream} response: {message}")]
    Malformed {
        upstream: &'static str,
        message: String,
    },
}

/// Filters sent to the statistics source.
///
/// The month is deliberately absent: one upstream call serves every month of
/// the fiscal year and callers filter locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceQuery {
    pub state_name: String,
    pub fiscal_year: String,
    pub region_name: Option<String>,
    pub region_code: Option<String>,
}

impl SourceQuery {
    /// `(source field, uppercased value)` pairs; the source matches on uppercase.
    pub fn filters(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("state_name", self.state_name.to_uppercase()),
            ("fin_year", self.fiscal_year.to_uppercase()),
        ];
        if let Some(name) = &self.region_name {
            out.push(("district_name", name.to_uppercase()));
        }
        if let Some(code) = &self.region_code {
            out.push(("district_code", code.to_uppercase()));
        }
        out
    }
}

/// Response envelope of the statistics source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub records: Option<Vec<RawRecord>>,
}

impl SourceResponse {
    pub fn into_records(self, upstream: &'static str) -> Result<Vec<RawRecord>, AdapterError> {
        match self.status.as_deref() {
            Some("ok") => Ok(self.records.unwrap_or_default()),
            other => Err(AdapterError::Upstream {
                upstream,
                message: self
                    .message
                    .unwrap_or_else(|| format!("status {}", other.unwrap_or("missing"))),
            }),
        }
    }
}

#[async_trait]
pub trait StatisticsSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, AdapterError>;
}

/// Payload handed to the generation service: the target language plus the
/// record to explain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub language: String,
    pub data: Value,
}

#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Router;
    use serde_json::json;

    pub async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{addr}")
    }

    #[test]
    fn filters_are_uppercased_and_optional_region_filters_omitted() {
        let query = SourceQuery {
            state_name: "Maharashtra".into(),
            fiscal_year: "2024-2025".into(),
            region_name: Some("Pune".into()),
            region_code: None,
        };
        assert_eq!(
            query.filters(),
            vec![
                ("state_name", "MAHARASHTRA".to_string()),
                ("fin_year", "2024-2025".to_string()),
                ("district_name", "PUNE".to_string()),
            ]
        );
    }

    #[test]
    fn non_ok_status_is_an_upstream_failure() {
        let response: SourceResponse =
            serde_json::from_value(json!({"status": "error", "message": "invalid api key"}))
                .expect("parse");
        match response.into_records("data.gov.in") {
            Err(AdapterError::Upstream { message, .. }) => assert_eq!(message, "invalid api key"),
            other => panic!("unexpected: {other:?}"),
        }

        let empty: SourceResponse =
            serde_json::from_value(json!({"status": "ok", "records": null})).expect("parse");
        assert!(empty.into_records("data.gov.in").expect("ok").is_empty());
    }
}
