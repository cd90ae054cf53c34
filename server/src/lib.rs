use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use shop_core::engine::ProjectStats;
use shop_core::query::SearchItem;
use shop_core::{
    Document, EngineError, Filters, PopularPeriod, PopularResponse, SearchEngine, SearchRequest, SearchResponse,
    SortOrder, SuggestResponse,
};
use shop_indexer::{
    DeltaFeedProcessor, DeltaReport, Downloader, FeedConfig, FeedError, FeedFormat, FeedJob, FeedJobSpec,
    FullFeedProcessor, FullReport, Scheduler,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub full: FullFeedProcessor,
    pub delta: DeltaFeedProcessor,
    pub scheduler: Option<Scheduler>,
    pub admin_token: Option<String>,
}

impl AppState {
    /// Admin token comes from `ADMIN_TOKEN`; admin routes refuse every call when it is unset.
    pub fn new(engine: Arc<SearchEngine>, feed: &FeedConfig, scheduler: Option<Scheduler>) -> Result<Self, FeedError> {
        let downloader = Arc::new(Downloader::new(feed)?);
        Ok(Self {
            full: FullFeedProcessor::new(engine.clone(), downloader.clone(), feed),
            delta: DeltaFeedProcessor::new(engine.clone(), downloader, feed),
            engine,
            scheduler,
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
        })
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/projects/:project/search", get(search_handler))
        .route("/projects/:project/suggest", get(suggest_handler))
        .route("/projects/:project/popular", get(popular_handler))
        .route("/projects/:project/doc/:doc_id", get(doc_handler))
        .route("/projects/:project/similar/:doc_id", get(similar_handler))
        .route("/projects/:project/click", post(click_handler))
        .route("/projects/:project/stats", get(stats_handler))
        .route("/admin/projects/:project/feed", post(full_feed_handler))
        .route("/admin/projects/:project/delta", post(delta_feed_handler))
        .route("/admin/jobs", get(list_jobs).post(register_job))
        .route("/admin/jobs/:job_id/run", post(run_job))
        .route("/admin/jobs/:job_id/pause", post(pause_job))
        .route("/admin/jobs/:job_id/resume", post(resume_job))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn engine_error(err: EngineError) -> (StatusCode, String) {
    match err {
        EngineError::ProjectNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        EngineError::WriterBusy(_) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        EngineError::Store(_) => {
            tracing::error!(error = %err, "store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn feed_error(err: FeedError) -> (StatusCode, String) {
    let status = match err {
        FeedError::UnknownFormat(_) | FeedError::InvalidSource(_) | FeedError::Parse(_) => StatusCode::BAD_REQUEST,
        FeedError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        FeedError::IndexSwap(_) => StatusCode::SERVICE_UNAVAILABLE,
        FeedError::Download(_) | FeedError::Timeout(_) => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
    pub offset: usize,
    pub sort: SortOrder,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub in_stock: Option<bool>,
}

impl SearchParams {
    fn into_request(self) -> SearchRequest {
        let filters = Filters {
            price_min: self.price_min,
            price_max: self.price_max,
            category: self.category,
            brand: self.brand,
            in_stock: self.in_stock,
        };
        let request = SearchRequest::new(self.q).with_offset(self.offset).with_sort(self.sort).with_filters(filters);
        match self.limit {
            Some(limit) => request.with_limit(limit),
            None => request,
        }
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    state.engine.search(&project, &params.into_request()).map(Json).map_err(engine_error)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SuggestParams {
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn suggest_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<SuggestParams>,
) -> ApiResult<SuggestResponse> {
    state.engine.suggest(&project, &params.q, params.limit).map(Json).map_err(engine_error)
}

#[derive(Debug, Deserialize)]
pub struct PopularParams {
    #[serde(default = "default_popular_limit")]
    pub limit: usize,
    #[serde(default)]
    pub period: PopularPeriod,
}

fn default_popular_limit() -> usize {
    10
}

pub async fn popular_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<PopularParams>,
) -> ApiResult<PopularResponse> {
    let limit = params.limit.clamp(1, 100);
    state.engine.popular(&project, limit, params.period).map(Json).map_err(engine_error)
}

pub async fn doc_handler(State(state): State<AppState>, Path((project, doc_id)): Path<(String, String)>) -> ApiResult<Document> {
    match state.engine.document(&project, &doc_id).map_err(engine_error)? {
        Some(doc) => Ok(Json(doc)),
        None => Err((StatusCode::NOT_FOUND, format!("document not found: {doc_id}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    #[serde(default = "default_similar_limit")]
    pub limit: usize,
}

fn default_similar_limit() -> usize {
    8
}

pub async fn similar_handler(
    State(state): State<AppState>,
    Path((project, doc_id)): Path<(String, String)>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<Vec<SearchItem>> {
    let limit = params.limit.clamp(1, 50);
    match state.engine.similar(&project, &doc_id, limit).map_err(engine_error)? {
        Some(items) => Ok(Json(items)),
        None => Err((StatusCode::NOT_FOUND, format!("document not found: {doc_id}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ClickBody {
    pub doc_id: String,
}

pub async fn click_handler(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<ClickBody>,
) -> ApiResult<serde_json::Value> {
    let recorded = state.engine.record_click(&project, &body.doc_id).map_err(engine_error)?;
    if !recorded {
        return Err((StatusCode::NOT_FOUND, format!("document not found: {}", body.doc_id)));
    }
    Ok(Json(serde_json::json!({ "recorded": true })))
}

pub async fn stats_handler(State(state): State<AppState>, Path(project): Path<String>) -> ApiResult<ProjectStats> {
    state.engine.stats(&project).map(Json).map_err(engine_error)
}

// --- Admin endpoints ---

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub format: String,
}

/// Full feed pushed in the request body; replaces the project's index.
async fn full_feed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Query(params): Query<FeedParams>,
    body: Bytes,
) -> ApiResult<FullReport> {
    authorize(&state, &headers)?;
    let format: FeedFormat = params.format.parse().map_err(feed_error)?;
    let full = state.full.clone();
    tokio::task::spawn_blocking(move || full.index_bytes(&project, &body, format))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map(Json)
        .map_err(feed_error)
}

/// Delta feed pushed in the request body.
async fn delta_feed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Query(params): Query<FeedParams>,
    body: Bytes,
) -> ApiResult<DeltaReport> {
    authorize(&state, &headers)?;
    let format: FeedFormat = params.format.parse().map_err(feed_error)?;
    let delta = state.delta.clone();
    tokio::task::spawn_blocking(move || delta.apply_bytes(&project, &body, format))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map(Json)
        .map_err(feed_error)
}

fn scheduler(state: &AppState) -> Result<&Scheduler, (StatusCode, String)> {
    state.scheduler.as_ref().ok_or((StatusCode::NOT_IMPLEMENTED, "scheduler not running".into()))
}

async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<FeedJob>> {
    authorize(&state, &headers)?;
    Ok(Json(scheduler(&state)?.jobs()))
}

async fn register_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(spec): Json<FeedJobSpec>,
) -> Result<(StatusCode, Json<FeedJob>), (StatusCode, String)> {
    authorize(&state, &headers)?;
    let job = scheduler(&state)?.register(&spec).map_err(feed_error)?;
    Ok((StatusCode::CREATED, Json(job)))
}

fn job_not_found(job_id: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("job not found: {job_id}"))
}

async fn run_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    authorize(&state, &headers)?;
    if scheduler(&state)?.trigger(&job_id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(job_not_found(&job_id))
    }
}

async fn pause_job(State(state): State<AppState>, headers: HeaderMap, Path(job_id): Path<String>) -> ApiResult<FeedJob> {
    set_active(&state, &headers, &job_id, false)
}

async fn resume_job(State(state): State<AppState>, headers: HeaderMap, Path(job_id): Path<String>) -> ApiResult<FeedJob> {
    set_active(&state, &headers, &job_id, true)
}

fn set_active(state: &AppState, headers: &HeaderMap, job_id: &str, active: bool) -> ApiResult<FeedJob> {
    authorize(state, headers)?;
    let scheduler = scheduler(state)?;
    if !scheduler.set_active(job_id, active) {
        return Err(job_not_found(job_id));
    }
    scheduler.job(job_id).map(Json).ok_or_else(|| job_not_found(job_id))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
