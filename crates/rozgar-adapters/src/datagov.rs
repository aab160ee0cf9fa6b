use async_trait::async_trait;
use rozgar_core::RawRecord;
use tracing::info;

use crate::{
    AdapterError, HttpClientConfig, HttpFetcher, SourceQuery, SourceResponse, StatisticsSource,
};

/// MGNREGA district-wise monthly statistics resource on data.gov.in.
pub const DATA_GOV_DEFAULT_BASE_URL: &str =
    "https://api.data.gov.in/resource/ee03643a-ee4c-48c2-ac30-9f2ff26ab722";

const UPSTREAM: &str = "data.gov.in";

#[derive(Debug, Clone)]
pub struct DataGovConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_limit: usize,
    pub http: HttpClientConfig,
}

/// Statistics source backed by the data.gov.in resource API.
#[derive(Debug)]
pub struct DataGovStatisticsSource {
    http: HttpFetcher,
    base_url: String,
    api_key: String,
    page_limit: usize,
}

impl DataGovStatisticsSource {
    pub fn new(config: DataGovConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpFetcher::new(UPSTREAM, config.http)?,
            base_url: config.base_url,
            api_key: config.api_key,
            page_limit: config.page_limit.max(1),
        })
    }

    fn query_params(&self, query: &SourceQuery) -> Vec<(String, String)> {
        let mut params = vec![
            ("api-key".to_string(), self.api_key.clone()),
            ("format".to_string(), "json".to_string()),
            ("offset".to_string(), "0".to_string()),
            ("limit".to_string(), self.page_limit.to_string()),
        ];
        params.extend(
            query
                .filters()
                .into_iter()
                .map(|(field, value)| (format!("filters[{field}]"), value)),
        );
        params
    }
}

#[async_trait]
impl StatisticsSource for DataGovStatisticsSource {
    fn source_id(&self) -> &'static str {
        UPSTREAM
    }

    async fn fetch_records(&self, query: &SourceQuery) -> Result<Vec<RawRecord>, AdapterError> {
        let body = self
            .http
            .get_json(&self.base_url, &self.query_params(query))
            .await?;
        let response: SourceResponse =
            serde_json::from_value(body).map_err(|err| AdapterError::Malformed {
                upstream: UPSTREAM,
                message: err.to_string(),
            })?;
        let records = response.into_records(UPSTREAM)?;
        info!(
            state = %query.state_name,
            fiscal_year = %query.fiscal_year,
            records = records.len(),
            "fetched statistics from source"
        );
        Ok(records)
    }
}
