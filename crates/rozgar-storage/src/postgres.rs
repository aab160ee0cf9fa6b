use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rozgar_core::{
    Explanation, ExplanationKey, NewExplanation, NewStatRecord, Page, StatFilter, StatKey,
    StatMetrics, StatRecord,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    describe_explanation_key, describe_stat_key, ExplanationCache, InsertOutcome, QueryPage,
    RecordStore, StoreError,
};

const STAT_COLUMNS: &str = "id, region_code, region_name, state_code, state_name, fiscal_year, \
     month, metrics, remarks, created_at";

const EXPLANATION_COLUMNS: &str = "id, region_code, fiscal_year, month, language, state_code, \
     state_name, region_name, response, created_at";

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Escape LIKE wildcards so name filters match literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_stat_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &StatFilter) {
    qb.push(" WHERE TRUE");
    if let Some(name) = &filter.state_name {
        qb.push(" AND state_name ILIKE ").push_bind(like_pattern(name));
    }
    if let Some(name) = &filter.region_name {
        qb.push(" AND region_name ILIKE ").push_bind(like_pattern(name));
    }
    for (column, value) in [
        ("state_code", &filter.state_code),
        ("region_code", &filter.region_code),
        ("fiscal_year", &filter.fiscal_year),
        ("month", &filter.month),
    ] {
        if let Some(value) = value {
            qb.push(format!(" AND {column} = ")).push_bind(value.clone());
        }
    }
}

fn stat_record_from_row(row: &PgRow) -> Result<StatRecord, sqlx::Error> {
    let metrics: Json<StatMetrics> = row.try_get("metrics")?;
    Ok(StatRecord {
        id: row.try_get("id")?,
        record: NewStatRecord {
            region_code: row.try_get("region_code")?,
            region_name: row.try_get("region_name")?,
            state_code: row.try_get("state_code")?,
            state_name: row.try_get("state_name")?,
            fiscal_year: row.try_get("fiscal_year")?,
            month: row.try_get("month")?,
            metrics: metrics.0,
            remarks: row.try_get("remarks")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn explanation_from_row(row: &PgRow) -> Result<Explanation, sqlx::Error> {
    Ok(Explanation {
        id: row.try_get("id")?,
        explanation: NewExplanation {
            key: ExplanationKey {
                region_code: row.try_get("region_code")?,
                fiscal_year: row.try_get("fiscal_year")?,
                month: row.try_get("month")?,
                language: row.try_get("language")?,
            },
            state_code: row.try_get("state_code")?,
            state_name: row.try_get("state_name")?,
            region_name: row.try_get("region_name")?,
            response: row.try_get("response")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_by_key(&self, key: &StatKey) -> Result<Option<StatRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {STAT_COLUMNS} FROM stat_records \
              WHERE region_code = $1 AND fiscal_year = $2 AND month = $3"
        ))
        .bind(&key.region_code)
        .bind(&key.fiscal_year)
        .bind(&key.month)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stat_record_from_row).transpose()?)
    }

    async fn insert_if_absent(&self, record: NewStatRecord) -> Result<InsertOutcome, StoreError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO stat_records
                (id, region_code, region_name, state_code, state_name, fiscal_year,
                 month, metrics, remarks, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (region_code, fiscal_year, month) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&record.region_code)
        .bind(&record.region_name)
        .bind(&record.state_code)
        .bind(&record.state_name)
        .bind(&record.fiscal_year)
        .bind(&record.month)
        .bind(Json(record.metrics))
        .bind(&record.remarks)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %describe_stat_key(&record.key()), "stat record already stored");
            return Ok(InsertOutcome::Duplicate);
        }
        Ok(InsertOutcome::Inserted(StatRecord {
            id,
            record,
            created_at,
        }))
    }

    async fn query(&self, filter: &StatFilter, page: Page) -> Result<QueryPage, StoreError> {
        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {STAT_COLUMNS} FROM stat_records"));
        push_stat_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(to_i64(page.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(page.offset));
        let rows = select.build().fetch_all(&self.pool).await?;
        let records = rows
            .iter()
            .map(stat_record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stat_records");
        push_stat_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(QueryPage {
            records,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgExplanationCache {
    pool: PgPool,
}

impl PgExplanationCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExplanationCache for PgExplanationCache {
    async fn find_by_key(&self, key: &ExplanationKey) -> Result<Option<Explanation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXPLANATION_COLUMNS} FROM ai_explanations \
              WHERE region_code = $1 AND fiscal_year = $2 AND month = $3 AND language = $4"
        ))
        .bind(&key.region_code)
        .bind(&key.fiscal_year)
        .bind(&key.month)
        .bind(&key.language)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(explanation_from_row).transpose()?)
    }

    async fn insert(&self, explanation: NewExplanation) -> Result<Explanation, StoreError> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO ai_explanations
                (id, region_code, fiscal_year, month, language, state_code,
                 state_name, region_name, response, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(&explanation.key.region_code)
        .bind(&explanation.key.fiscal_year)
        .bind(&explanation.key.month)
        .bind(&explanation.key.language)
        .bind(&explanation.state_code)
        .bind(&explanation.state_name)
        .bind(&explanation.region_name)
        .bind(&explanation.response)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Explanation {
                id,
                explanation,
                created_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                StoreError::DuplicateKey(describe_explanation_key(&explanation.key)),
            ),
            Err(err) => Err(err.into()),
        }
    }
}
