//! Cache-or-fetch orchestration for statistics and cache-or-generate
//! orchestration for AI explanations.

mod explain;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rozgar_adapters::{
    AdapterError, BackoffPolicy, DataGovConfig, DataGovStatisticsSource, ExplanationGenerator,
    FixtureStatisticsSource, GeminiConfig, GeminiGenerator, HttpClientConfig, StatisticsSource,
    DATA_GOV_DEFAULT_BASE_URL, GEMINI_DEFAULT_BASE_URL, GEMINI_DEFAULT_MODEL,
};
use rozgar_core::Page;
use rozgar_storage::{
    ExplanationCache, MemoryExplanationCache, MemoryRecordStore, PgExplanationCache,
    PgRecordStore, RecordStore, StoreError,
};
use thiserror::Error;
use tracing::{info, warn};

pub use explain::{ExplainOutcome, ExplainRequest, ExplanationOrchestrator};
pub use stats::{BatchCounts, FetchSummary, Provenance, StatLookup, StatRequest, SyncOrchestrator};

pub const CRATE_NAME: &str = "rozgar-sync";

/// Request-level failures, one variant per caller-visible outcome.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AdapterError> for SyncError {
    fn from(err: AdapterError) -> Self {
        SyncError::Upstream(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Internal(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub data_gov_base_url: String,
    pub data_gov_api_key: String,
    pub source_fixture: Option<PathBuf>,
    pub source_page_limit: usize,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_api_key: String,
    pub gemini_temperature: f64,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub generation_timeout_secs: u64,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_non_empty("DATABASE_URL"),
            database_max_connections: env_parse("ROZGAR_DB_MAX_CONNECTIONS", 10),
            data_gov_base_url: env_or("DATA_GOV_BASE_URL", DATA_GOV_DEFAULT_BASE_URL),
            data_gov_api_key: env_or("DATA_GOV_API_KEY", ""),
            source_fixture: env_non_empty("ROZGAR_SOURCE_FIXTURE").map(PathBuf::from),
            source_page_limit: env_parse("ROZGAR_SOURCE_PAGE_LIMIT", Page::DEFAULT_LIMIT),
            gemini_base_url: env_or("GEMINI_BASE_URL", GEMINI_DEFAULT_BASE_URL),
            gemini_model: env_or("GEMINI_MODEL", GEMINI_DEFAULT_MODEL),
            gemini_api_key: env_or("GEMINI_API_KEY", ""),
            gemini_temperature: env_parse("GEMINI_TEMPERATURE", 0.7),
            user_agent: env_or("ROZGAR_USER_AGENT", "rozgar-darpan/0.1"),
            http_timeout_secs: env_parse("ROZGAR_HTTP_TIMEOUT_SECS", 20),
            generation_timeout_secs: env_parse("ROZGAR_GENERATION_TIMEOUT_SECS", 60),
        }
    }
}

/// Process-wide orchestrators, each built once with its collaborators injected.
#[derive(Clone)]
pub struct Services {
    pub sync: Arc<SyncOrchestrator>,
    pub explain: Arc<ExplanationOrchestrator>,
}

impl Services {
    pub fn new(
        records: Arc<dyn RecordStore>,
        explanations: Arc<dyn ExplanationCache>,
        source: Arc<dyn StatisticsSource>,
        generator: Arc<dyn ExplanationGenerator>,
        page_limit: usize,
    ) -> Self {
        Self {
            sync: Arc::new(SyncOrchestrator::new(records, source).with_page_limit(page_limit)),
            explain: Arc::new(ExplanationOrchestrator::new(explanations, generator)),
        }
    }
}

fn build_source(config: &SyncConfig) -> Result<Arc<dyn StatisticsSource>> {
    if let Some(path) = &config.source_fixture {
        info!(fixture = %path.display(), "serving statistics from fixture");
        return Ok(Arc::new(FixtureStatisticsSource::from_path(path)?));
    }
    if config.data_gov_api_key.is_empty() {
        warn!("DATA_GOV_API_KEY is not set; statistics source calls will be rejected upstream");
    }
    let source = DataGovStatisticsSource::new(DataGovConfig {
        base_url: config.data_gov_base_url.clone(),
        api_key: config.data_gov_api_key.clone(),
        page_limit: config.source_page_limit,
        http: HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        },
    })
    .context("building statistics source client")?;
    Ok(Arc::new(source))
}

fn build_generator(config: &SyncConfig) -> Result<Arc<dyn ExplanationGenerator>> {
    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY is not set; explanation generation will be rejected upstream");
    }
    let generator = GeminiGenerator::new(GeminiConfig {
        base_url: config.gemini_base_url.clone(),
        model: config.gemini_model.clone(),
        api_key: config.gemini_api_key.clone(),
        temperature: config.gemini_temperature,
        http: HttpClientConfig {
            timeout: Duration::from_secs(config.generation_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            backoff: BackoffPolicy::none(),
            ..Default::default()
        },
    })
    .context("building generation client")?;
    Ok(Arc::new(generator))
}

/// Build the orchestrators from configuration.
///
/// Without `DATABASE_URL` both stores live in process memory and are lost on exit.
pub async fn build_services(config: &SyncConfig) -> Result<Services> {
    let source = build_source(config)?;
    let generator = build_generator(config)?;

    let (records, explanations): (Arc<dyn RecordStore>, Arc<dyn ExplanationCache>) =
        match &config.database_url {
            Some(url) => {
                let pool = rozgar_storage::connect(url, config.database_max_connections)
                    .await
                    .context("connecting to database")?;
                rozgar_storage::run_migrations(&pool)
                    .await
                    .context("applying migrations")?;
                (
                    Arc::new(PgRecordStore::new(pool.clone())),
                    Arc::new(PgExplanationCache::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL is not set; using in-memory stores");
                (
                    Arc::new(MemoryRecordStore::new()),
                    Arc::new(MemoryExplanationCache::new()),
                )
            }
        };

    Ok(Services::new(
        records,
        explanations,
        source,
        generator,
        config.source_page_limit,
    ))
}

pub async fn build_services_from_env() -> Result<Services> {
    build_services(&SyncConfig::from_env()).await
}

/// Apply the database migrations without starting anything else.
pub async fn migrate_from_env() -> Result<()> {
    let config = SyncConfig::from_env();
    let url = config
        .database_url
        .context("DATABASE_URL must be set to run migrations")?;
    let pool = rozgar_storage::connect(&url, 1)
        .await
        .context("connecting to database")?;
    rozgar_storage::run_migrations(&pool)
        .await
        .context("applying migrations")?;
    Ok(())
}
