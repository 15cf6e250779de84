//! HTTP surface for ingestion, search, and document metadata retrieval
//! (SPEC_FULL.md §6). Same Axum/tower-http shape the teacher used for its
//! MCP server: a typed `AppError` converting into a JSON error body, CORS
//! open to all origins, one `AppState` shared across handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/process` | Submit a document for ingestion |
//! | `POST` | `/delete` | Remove a document and its records |
//! | `GET`  | `/status/{doc_id}` | Ingestion status for a document |
//! | `POST` | `/search` | Two-stage multi-vector search |
//! | `GET`  | `/documents/{doc_id}/pages/{page}/structure` | Decoded page structure |
//! | `GET`  | `/documents/{doc_id}/chunks/{chunk_id}` | A single text chunk record |
//! | `GET`  | `/health` | Health check |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must be 2..=500 chars" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `queue_full` (503), `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use docuvec_core::embedding::EmbeddingEngine;
use docuvec_core::search::{self, SearchError, SearchMode, SearchParams};
use docuvec_core::store::{Collection, MetaValue, VectorStoreClient, WhereFilter};

use crate::config::Config;
use crate::ingestion::{IngestError, IngestState, IngestionPipeline};
use crate::parser::Parser;
use crate::stats::{SearchSample, SearchStats};

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    engine: Arc<dyn EmbeddingEngine>,
    store: Arc<dyn VectorStoreClient>,
    pipeline: Arc<IngestionPipeline<dyn EmbeddingEngine, dyn VectorStoreClient>>,
    stats: Arc<SearchStats>,
}

/// Start the HTTP server. Builds the ingestion pipeline internally so
/// callers only need to supply the backends chosen by `config`.
pub async fn run_server(
    config: Config,
    engine: Arc<dyn EmbeddingEngine>,
    store: Arc<dyn VectorStoreClient>,
    parser: Arc<dyn Parser>,
) -> anyhow::Result<()> {
    let bind_addr = config.server_bind.clone();
    let config = Arc::new(config);

    let pipeline = Arc::new(IngestionPipeline::new(
        (*config).clone(),
        engine.clone(),
        store.clone(),
        parser,
    ));

    let state = AppState {
        config,
        engine,
        store,
        pipeline,
        stats: Arc::new(SearchStats::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/process", post(handle_process))
        .route("/delete", post(handle_delete))
        .route("/status/{doc_id}", get(handle_status))
        .route("/search", post(handle_search))
        .route("/documents/{doc_id}/pages/{page}/structure", get(handle_page_structure))
        .route("/documents/{doc_id}/chunks/{chunk_id}", get(handle_chunk))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %bind_addr, "docuvec server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn queue_full(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "queue_full".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn search_error(err: SearchError) -> AppError {
    match err {
        SearchError::InvalidQuery(msg) | SearchError::InvalidFilter(msg) => bad_request(msg),
        SearchError::EmbeddingFailed(e) => internal_error(e.to_string()),
        SearchError::StoreUnavailable(e) => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "store_unavailable".to_string(),
            message: e.to_string(),
        },
        SearchError::Timeout => AppError {
            status: StatusCode::GATEWAY_TIMEOUT,
            code: "search_timeout".to_string(),
            message: "search deadline exceeded".to_string(),
        },
    }
}

// ============ POST /process ============

#[derive(Deserialize)]
struct ProcessRequest {
    file_path: String,
    filename: String,
    doc_id: Option<String>,
}

#[derive(Serialize)]
struct ProcessResponse {
    doc_id: String,
    status: String,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, AppError> {
    let doc_id = req
        .doc_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(existing) = state.pipeline.status(&doc_id) {
        if !existing.state.is_terminal() {
            return Err(conflict(format!("document '{doc_id}' is already processing")));
        }
    }

    let ack = state
        .pipeline
        .submit(doc_id.clone(), req.file_path.into(), req.filename)
        .await
        .map_err(|e| match e {
            IngestError::QueueFull => queue_full("ingestion queue is full"),
            IngestError::NotFound(id) => not_found(format!("unknown document: {id}")),
        })?;

    Ok(Json(ProcessResponse {
        doc_id: ack.doc_id,
        status: "queued".to_string(),
    }))
}

// ============ POST /delete ============

#[derive(Deserialize)]
struct DeleteRequest {
    doc_id: String,
}

#[derive(Serialize)]
struct DeleteResponse {
    doc_id: String,
    deleted: bool,
}

async fn handle_delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    if state.pipeline.status(&req.doc_id).is_none() {
        return Err(not_found(format!("unknown document: {}", req.doc_id)));
    }
    state
        .pipeline
        .delete(&req.doc_id, state.store.as_ref())
        .await
        .map_err(|e| match e {
            IngestError::QueueFull => queue_full("ingestion queue is full"),
            IngestError::NotFound(id) => not_found(format!("unknown document: {id}")),
        })?;
    Ok(Json(DeleteResponse {
        doc_id: req.doc_id,
        deleted: true,
    }))
}

// ============ GET /status/{doc_id} ============

#[derive(Serialize)]
struct StatusResponse {
    doc_id: String,
    status: String,
    stage: String,
    progress: f32,
    elapsed_seconds: f64,
    error: Option<String>,
}

fn status_bucket(state: &IngestState) -> &'static str {
    match state {
        IngestState::Submitted | IngestState::Queued => "queued",
        IngestState::Parsing
        | IngestState::EmbeddingVisual
        | IngestState::EmbeddingText
        | IngestState::Storing => "processing",
        IngestState::Completed => "completed",
        IngestState::Failed(_) => "failed",
        IngestState::Cancelled => "cancelled",
    }
}

fn stage_name(state: &IngestState) -> &'static str {
    match state {
        IngestState::Submitted => "submitted",
        IngestState::Queued => "queued",
        IngestState::Parsing => "parsing",
        IngestState::EmbeddingVisual => "embedding_visual",
        IngestState::EmbeddingText => "embedding_text",
        IngestState::Storing => "storing",
        IngestState::Completed => "completed",
        IngestState::Failed(_) => "failed",
        IngestState::Cancelled => "cancelled",
    }
}

async fn handle_status(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let rec = state
        .pipeline
        .status(&doc_id)
        .ok_or_else(|| not_found(format!("unknown document: {doc_id}")))?;

    Ok(Json(StatusResponse {
        doc_id: rec.doc_id,
        status: status_bucket(&rec.state).to_string(),
        stage: stage_name(&rec.state).to_string(),
        progress: rec.progress,
        elapsed_seconds: rec.elapsed_ms as f64 / 1000.0,
        error: rec.error,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    embedding_engine: bool,
    store: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_ok = state.store.heartbeat().await;
    Json(HealthResponse {
        ok: store_ok,
        embedding_engine: true,
        store: store_ok,
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_n_results")]
    n_results: usize,
    #[serde(default = "default_search_mode")]
    search_mode: String,
    #[serde(default)]
    filters: Option<SearchFilters>,
}

fn default_n_results() -> usize {
    10
}

fn default_search_mode() -> String {
    "hybrid".to_string()
}

const MAX_N_RESULTS: usize = 50;

#[derive(Deserialize, Default)]
struct SearchFilters {
    date_range: Option<DateRange>,
    filename_contains: Option<String>,
    doc_types: Option<Vec<String>>,
    page_range: Option<PageRange>,
}

#[derive(Deserialize)]
struct DateRange {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct PageRange {
    min: Option<i64>,
    max: Option<i64>,
}

fn parse_mode(raw: &str) -> Result<SearchMode, AppError> {
    match raw {
        "hybrid" => Ok(SearchMode::Hybrid),
        "visual_only" => Ok(SearchMode::VisualOnly),
        "text_only" => Ok(SearchMode::TextOnly),
        other => Err(bad_request(format!(
            "unknown search_mode '{other}', expected hybrid, visual_only, or text_only"
        ))),
    }
}

fn iso_date_to_timestamp(date: &str) -> Result<i64, AppError> {
    use chrono::{NaiveDate, TimeZone, Utc};
    let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| bad_request(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
    let datetime = naive.and_hms_opt(0, 0, 0).unwrap();
    Ok(Utc.from_utc_datetime(&datetime).timestamp())
}

fn build_filter(filters: SearchFilters) -> Result<Option<WhereFilter>, AppError> {
    let mut clauses = Vec::new();

    if let Some(range) = filters.date_range {
        let start = range.start.as_deref().map(iso_date_to_timestamp).transpose()?;
        let end = range.end.as_deref().map(iso_date_to_timestamp).transpose()?;
        if start.is_some() || end.is_some() {
            clauses.push(WhereFilter::Range("timestamp".into(), start, end));
        }
    }

    if let Some(needle) = filters.filename_contains {
        clauses.push(WhereFilter::ContainsSubstring("filename".into(), needle));
    }

    if let Some(types) = filters.doc_types {
        if !types.is_empty() {
            let by_type = types
                .into_iter()
                .map(|t| WhereFilter::ContainsSubstring("filename".into(), format!(".{t}")))
                .collect();
            clauses.push(WhereFilter::Any(by_type));
        }
    }

    if let Some(range) = filters.page_range {
        if range.min.is_some() || range.max.is_some() {
            clauses.push(WhereFilter::Range("page".into(), range.min, range.max));
        }
    }

    Ok(match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(WhereFilter::All(clauses)),
    })
}

#[derive(Serialize)]
struct SearchResultDto {
    doc_id: String,
    score: f32,
    origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_id: Option<String>,
    filename: String,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    section_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    element_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<[f32; 4]>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    total_results: usize,
    search_mode: String,
    search_time_ms: u64,
    partial: bool,
    results: Vec<SearchResultDto>,
}

fn bbox_from_metadata(raw: Option<&str>) -> Option<[f32; 4]> {
    let bbox: docuvec_core::models::BBox = serde_json::from_str(raw?).ok()?;
    Some([bbox.x1, bbox.y1, bbox.x2, bbox.y2])
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let mode = parse_mode(&req.search_mode)?;
    let n_results = req.n_results.clamp(0, MAX_N_RESULTS);
    let filter = build_filter(req.filters.unwrap_or_default())?;

    let params = SearchParams {
        n_results,
        candidate_multiplier: state.config.candidate_multiplier,
        min_candidates: state.config.min_candidates,
        deadline_ms: state.config.search_deadline_ms,
    };

    let started = std::time::Instant::now();
    let outcome = search::search(
        state.engine.as_ref(),
        state.store.as_ref(),
        &req.query,
        mode,
        &params,
        filter.as_ref(),
    )
    .await
    .map_err(search_error)?;
    let elapsed = started.elapsed();

    state.stats.record(SearchSample {
        total_ms: elapsed.as_millis() as u64,
        stage1_ms: 0,
        stage2_ms: 0,
        candidates_considered: outcome.results.len() + outcome.dropped_corrupt,
    });

    let partial = outcome.partial;
    let results = outcome
        .results
        .into_iter()
        .map(|item| SearchResultDto {
            doc_id: item.doc_id,
            score: item.score,
            origin: item.origin.as_str().to_string(),
            page: item.metadata.get("page").and_then(MetaValue::as_int),
            chunk_id: item
                .metadata
                .get("chunk_id")
                .and_then(MetaValue::as_text)
                .map(str::to_string),
            filename: item
                .metadata
                .get("filename")
                .and_then(MetaValue::as_text)
                .unwrap_or_default()
                .to_string(),
            timestamp: item.metadata.get("timestamp").and_then(MetaValue::as_int).unwrap_or(0),
            section_path: item
                .metadata
                .get("section_path")
                .and_then(MetaValue::as_text)
                .map(str::to_string),
            element_type: item
                .metadata
                .get("element_type")
                .and_then(MetaValue::as_text)
                .map(str::to_string),
            bbox: bbox_from_metadata(item.metadata.get("bbox").and_then(MetaValue::as_text)),
        })
        .collect::<Vec<_>>();

    Ok(Json(SearchResponse {
        query: req.query,
        total_results: results.len(),
        search_mode: req.search_mode,
        search_time_ms: elapsed.as_millis() as u64,
        partial,
        results,
    }))
}

// ============ GET /documents/{doc_id}/pages/{page}/structure ============

#[derive(Serialize)]
struct CoordinateSystem {
    origin: String,
    units: String,
    image_width: i64,
    image_height: i64,
}

#[derive(Serialize)]
struct StructureResponse {
    doc_id: String,
    page: u32,
    has_structure: bool,
    structure: docuvec_core::models::DocumentStructure,
    coordinate_system: CoordinateSystem,
}

async fn handle_page_structure(
    State(state): State<AppState>,
    Path((doc_id, page)): Path<(String, u32)>,
) -> Result<Json<StructureResponse>, AppError> {
    let id = format!("{doc_id}-visual-p{page}");
    let records = state
        .store
        .get_many(Collection::Visual, &[id])
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| not_found(format!("no page {page} for document '{doc_id}'")))?;

    let has_structure = matches!(record.metadata.get("has_structure"), Some(MetaValue::Bool(true)));
    let structure = if has_structure {
        record
            .metadata
            .get("structure")
            .and_then(MetaValue::as_text)
            .map(docuvec_core::codec::decode_structure)
            .transpose()
            .map_err(|e| internal_error(e.to_string()))?
            .unwrap_or_default()
    } else {
        docuvec_core::models::DocumentStructure::default()
    };

    Ok(Json(StructureResponse {
        doc_id,
        page,
        has_structure,
        structure,
        coordinate_system: CoordinateSystem {
            origin: "top-left".to_string(),
            units: "pixels".to_string(),
            image_width: record.metadata.get("image_width").and_then(MetaValue::as_int).unwrap_or(0),
            image_height: record.metadata.get("image_height").and_then(MetaValue::as_int).unwrap_or(0),
        },
    }))
}

// ============ GET /documents/{doc_id}/chunks/{chunk_id} ============

#[derive(Serialize)]
struct ChunkResponse {
    doc_id: String,
    chunk_id: String,
    page: i64,
    page_nums: Vec<u32>,
    full_text: String,
    section_path: Option<String>,
    parent_heading: Option<String>,
    bbox: Option<[f32; 4]>,
    related_tables: Vec<String>,
    related_pictures: Vec<String>,
}

async fn handle_chunk(
    State(state): State<AppState>,
    Path((doc_id, chunk_id)): Path<(String, String)>,
) -> Result<Json<ChunkResponse>, AppError> {
    let records = state
        .store
        .get_many(Collection::Text, &[chunk_id.clone()])
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| not_found(format!("no chunk '{chunk_id}' for document '{doc_id}'")))?;

    let m = &record.metadata;
    let json_list = |key: &str| -> Vec<String> {
        m.get(key)
            .and_then(MetaValue::as_text)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    };

    Ok(Json(ChunkResponse {
        doc_id,
        chunk_id,
        page: m.get("page").and_then(MetaValue::as_int).unwrap_or(0),
        page_nums: m
            .get("page_nums")
            .and_then(MetaValue::as_text)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default(),
        full_text: m.get("full_text").and_then(MetaValue::as_text).unwrap_or_default().to_string(),
        section_path: m.get("section_path").and_then(MetaValue::as_text).map(str::to_string),
        parent_heading: m.get("parent_heading").and_then(MetaValue::as_text).map(str::to_string),
        bbox: bbox_from_metadata(m.get("bbox").and_then(MetaValue::as_text)),
        related_tables: json_list("related_tables"),
        related_pictures: json_list("related_pictures"),
    }))
}
