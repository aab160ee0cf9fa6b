//! JSON API for the statistics portal.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rozgar_core::{Page, StatFilter};
use rozgar_sync::{
    ExplainRequest, ExplanationOrchestrator, Provenance, Services, StatRequest, SyncError,
    SyncOrchestrator,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

pub const CRATE_NAME: &str = "rozgar-web";

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncOrchestrator>,
    pub explain: Arc<ExplanationOrchestrator>,
}

impl From<Services> for AppState {
    fn from(services: Services) -> Self {
        Self {
            sync: services.sync,
            explain: services.explain,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/district", get(query_handler))
        .route("/api/district/fetch", post(fetch_handler))
        .route("/api/district/get-or-fetch", post(get_or_fetch_handler))
        .route("/api/ai/ai-response", post(ai_response_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

/// Map an orchestration failure onto the `{success: false, message}` envelope.
///
/// `upstream_message` replaces upstream details so provider errors are not echoed to clients.
fn sync_failure(err: SyncError, upstream_message: &str) -> Response {
    match err {
        SyncError::Validation(message) => failure(StatusCode::BAD_REQUEST, message),
        SyncError::NotFound(message) => failure(StatusCode::NOT_FOUND, message),
        SyncError::Upstream(detail) => {
            error!(%detail, "upstream failure");
            failure(StatusCode::INTERNAL_SERVER_ERROR, upstream_message)
        }
        SyncError::Internal(detail) => {
            error!(%detail, "internal failure");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    failure(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn bad_query(rejection: QueryRejection) -> Response {
    failure(StatusCode::BAD_REQUEST, rejection.body_text())
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.sync.fetch_and_persist(&request).await {
        Ok(summary) => Json(json!({
            "success": true,
            "message": "Data processed successfully",
            "savedRecords": summary.counts.saved,
            "skippedRecords": summary.counts.skipped,
            "errorRecords": summary.counts.errored,
            "totalRecords": summary.total,
            "data": summary.data,
        }))
        .into_response(),
        Err(err) => sync_failure(err, "Failed to fetch data from external API"),
    }
}

async fn get_or_fetch_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.sync.get_or_fetch(&request).await {
        Ok(lookup) => {
            let message = match lookup.source {
                Provenance::Database => "Data retrieved from database",
                Provenance::Source => "Data fetched from source and saved to database",
            };
            let mut envelope = json!({
                "success": true,
                "message": message,
                "source": lookup.source,
                "count": lookup.records.len(),
                "data": lookup.records,
            });
            if let Some(counts) = lookup.counts {
                envelope["savedRecords"] = json!(counts.saved);
                envelope["skippedRecords"] = json!(counts.skipped);
            }
            Json(envelope).into_response()
        }
        Err(err) => sync_failure(err, "Failed to fetch data from external API"),
    }
}

/// Query-string filters; every value arrives as text and limit/offset fall
/// back to their defaults when they do not parse. A zero limit means the
/// default page size.
#[derive(Debug, Default, Deserialize)]
struct StatQueryParams {
    state_name: Option<String>,
    state_code: Option<String>,
    #[serde(alias = "district_name")]
    region_name: Option<String>,
    #[serde(alias = "district_code")]
    region_code: Option<String>,
    #[serde(alias = "fin_year")]
    fiscal_year: Option<String>,
    month: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl StatQueryParams {
    fn into_parts(self) -> (StatFilter, Page) {
        let page = Page {
            limit: self
                .limit
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(Page::DEFAULT_LIMIT),
            offset: self
                .offset
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
        };
        let filter = StatFilter {
            state_name: non_blank(self.state_name),
            state_code: non_blank(self.state_code),
            region_name: non_blank(self.region_name),
            region_code: non_blank(self.region_code),
            fiscal_year: non_blank(self.fiscal_year),
            month: non_blank(self.month),
        };
        (filter, page)
    }
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StatQueryParams>, QueryRejection>,
) -> Response {
    let (filter, page) = match params {
        Ok(Query(params)) => params.into_parts(),
        Err(rejection) => return bad_query(rejection),
    };
    match state.sync.query(&filter, page).await {
        Ok(found) => Json(json!({
            "success": true,
            "count": found.records.len(),
            "total": found.total,
            "data": found.records,
        }))
        .into_response(),
        Err(err) => sync_failure(err, "Internal server error"),
    }
}

#[derive(Debug, Default, Deserialize)]
struct AiResponseBody {
    #[serde(default)]
    content: Option<ExplainRequest>,
}

async fn ai_response_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AiResponseBody>, JsonRejection>,
) -> Response {
    let content = match body {
        Ok(Json(AiResponseBody {
            content: Some(content),
        })) => content,
        Ok(_) => return failure(StatusCode::BAD_REQUEST, "content is required"),
        Err(rejection) => return bad_body(rejection),
    };
    match state.explain.explain(content).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "message": if outcome.cached {
                "AI response retrieved from cache"
            } else {
                "AI response generated successfully"
            },
            "response": outcome.response,
            "cached": outcome.cached,
        }))
        .into_response(),
        Err(err) => sync_failure(err, "Failed to generate AI response"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use rozgar_adapters::{
        AdapterError, ExplanationGenerator, FixtureStatisticsSource, GenerationRequest,
        SourceResponse, StatisticsSource,
    };
    use rozgar_core::RawRecord;
    use rozgar_storage::{MemoryExplanationCache, MemoryRecordStore};
    use tower::ServiceExt;

    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExplanationGenerator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} summary of {}", request.language, request.data["month"]))
        }
    }

    fn raw(month: &str) -> RawRecord {
        RawRecord::from(json!({
            "state_code": "32",
            "state_name": "KERALA",
            "district_code": "3206",
            "district_name": "IDUKKI",
            "fin_year": "2024-2025",
            "month": month,
            "Total_Exp": "88.25",
            "Wages": "",
        }))
    }

    fn state_with(source: Arc<dyn StatisticsSource>) -> AppState {
        Services::new(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryExplanationCache::new()),
            source,
            Arc::new(EchoGenerator::default()),
            1000,
        )
        .into()
    }

    fn kerala_state() -> AppState {
        state_with(Arc::new(FixtureStatisticsSource::from_records(vec![
            raw("April"),
            raw("May"),
        ])))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn kerala_body() -> Value {
        json!({"state_name": "Kerala", "fin_year": "2024-2025", "district_name": "Idukki"})
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(kerala_state());
        let (status, body) = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn fetch_reports_counts_and_is_idempotent() {
        let app = app(kerala_state());
        let (status, first) = send(&app, post_json("/api/district/fetch", kerala_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["success"], true);
        assert_eq!(first["savedRecords"], 2);
        assert_eq!(first["skippedRecords"], 0);
        assert_eq!(first["errorRecords"], 0);
        assert_eq!(first["totalRecords"], 2);
        assert_eq!(first["data"].as_array().map(Vec::len), Some(2));

        let (_, second) = send(&app, post_json("/api/district/fetch", kerala_body())).await;
        assert_eq!(second["savedRecords"], 0);
        assert_eq!(second["skippedRecords"], 2);
    }

    #[tokio::test]
    async fn get_or_fetch_reports_provenance() {
        let app = app(kerala_state());
        let (status, first) =
            send(&app, post_json("/api/district/get-or-fetch", kerala_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["source"], "source");
        assert_eq!(first["count"], 2);
        assert_eq!(first["savedRecords"], 2);
        assert_eq!(first["data"][0]["Total_Exp"], 88.25);
        assert_eq!(first["data"][0]["Wages"], 0.0);
        assert_eq!(first["data"][0]["district_code"], "3206");
        assert_eq!(first["data"][0]["district_name"], "IDUKKI");
        assert_eq!(first["data"][0]["fin_year"], "2024-2025");

        let (_, second) = send(&app, post_json("/api/district/get-or-fetch", kerala_body())).await;
        assert_eq!(second["source"], "database");
        assert!(second.get("savedRecords").is_none());
    }

    #[tokio::test]
    async fn failures_map_to_status_codes() {
        let app = app(kerala_state());

        let (status, body) = send(
            &app,
            post_json("/api/district/get-or-fetch", json!({"state_name": "Kerala"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let mut march = kerala_body();
        march["month"] = json!("March");
        let (status, body) = send(&app, post_json("/api/district/fetch", march)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "No records found for the month: March");

        let (status, _) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/district/fetch")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_failure_is_a_generic_500() {
        let app = app(state_with(Arc::new(FixtureStatisticsSource::new(
            SourceResponse {
                status: Some("error".into()),
                message: Some("Invalid API key secret-123".into()),
                records: None,
            },
        ))));
        let (status, body) = send(&app, post_json("/api/district/fetch", kerala_body())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to fetch data from external API");
    }

    #[tokio::test]
    async fn query_filters_and_paginates_leniently() {
        let app = app(kerala_state());
        send(&app, post_json("/api/district/fetch", kerala_body())).await;

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/district?district_name=idu&fin_year=2024-2025&limit=1&offset=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["total"], 2);

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/district?state_name=Goa")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn malformed_query_string_gets_json_envelope() {
        let app = app(kerala_state());
        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/district?month=May&month=June")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().is_some_and(|m| m.contains("month")));
    }

    #[tokio::test]
    async fn zero_limit_uses_default_page_size() {
        let app = app(kerala_state());
        send(&app, post_json("/api/district/fetch", kerala_body())).await;

        let (status, body) = send(
            &app,
            Request::builder()
                .uri("/api/district?state_name=kerala&limit=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["total"], 2);
    }

    #[tokio::test]
    async fn ai_response_generates_once_then_serves_cache() {
        let app = app(kerala_state());
        let body = json!({
            "content": {
                "language": "ml",
                "data": {"district_code": "3206", "fin_year": "2024-2025", "month": "May"}
            }
        });

        let (status, first) = send(&app, post_json("/api/ai/ai-response", body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cached"], false);
        assert_eq!(first["response"], "malayalam summary of \"May\"");

        let (_, second) = send(&app, post_json("/api/ai/ai-response", body)).await;
        assert_eq!(second["cached"], true);
        assert_eq!(second["response"], first["response"]);

        let (status, _) = send(&app, post_json("/api/ai/ai-response", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
