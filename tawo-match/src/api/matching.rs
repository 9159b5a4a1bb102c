//! Matching control endpoints
//!
//! Thin wrappers over [`MatchingHandle`](crate::services::MatchingHandle);
//! every state change happens inside the dispatch driver.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use crate::services::dispatch::{MatchingSnapshot, ResultsView, RowResultView};
use crate::services::export::{self, ExportFormat};
use crate::{ApiError, ApiResult, AppState};

/// POST /matching/rows/:row/select request
#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub rank: usize,
}

/// PUT /matching/rows/:row/reason request
#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// POST /matching/start
///
/// Loads the stored dataset. A dataset already sent in full is restored
/// without any request; otherwise a full pass starts.
pub async fn start(State(state): State<AppState>) -> ApiResult<Json<MatchingSnapshot>> {
    Ok(Json(state.matching.start().await?))
}

/// POST /matching/resend-all
///
/// Clears every stored result, selection and reason of the loaded dataset and
/// sends all rows again. A running pass is superseded.
pub async fn resend_all(State(state): State<AppState>) -> ApiResult<Json<MatchingSnapshot>> {
    info!("Resend-all requested");
    Ok(Json(state.matching.resend_all().await?))
}

/// POST /matching/resend-missing
///
/// **Errors:** 409 Conflict while a pass is running
pub async fn resend_missing(State(state): State<AppState>) -> ApiResult<Json<MatchingSnapshot>> {
    info!("Resend-missing requested");
    Ok(Json(state.matching.resend_missing().await?))
}

/// GET /matching/status
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<MatchingSnapshot>> {
    Ok(Json(state.matching.snapshot().await?))
}

/// GET /matching/results
pub async fn results(State(state): State<AppState>) -> ApiResult<Json<ResultsView>> {
    Ok(Json(state.matching.results().await?))
}

/// POST /matching/rows/:row/select
pub async fn select(
    State(state): State<AppState>,
    Path(row): Path<usize>,
    Json(request): Json<SelectRequest>,
) -> ApiResult<Json<RowResultView>> {
    Ok(Json(state.matching.select(row, request.rank).await?))
}

/// PUT /matching/rows/:row/reason
pub async fn set_reason(
    State(state): State<AppState>,
    Path(row): Path<usize>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<RowResultView>> {
    Ok(Json(state.matching.set_reason(row, request.reason).await?))
}

/// GET /matching/export?format=csv|tsv
pub async fn export_rows(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<impl IntoResponse> {
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<ExportFormat>().map_err(ApiError::BadRequest)?,
        None => ExportFormat::default(),
    };

    let rows = state.matching.export_rows().await?;
    let body = export::render(&rows, format).map_err(|e| ApiError::Internal(format!("Export failed: {}", e)))?;

    let disposition = format!("attachment; filename=\"tawo-matching.{}\"", format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Build matching routes
pub fn matching_routes() -> Router<AppState> {
    Router::new()
        .route("/matching/start", post(start))
        .route("/matching/resend-all", post(resend_all))
        .route("/matching/resend-missing", post(resend_missing))
        .route("/matching/status", get(status))
        .route("/matching/results", get(results))
        .route("/matching/rows/:row/select", post(select))
        .route("/matching/rows/:row/reason", put(set_reason))
        .route("/matching/export", get(export_rows))
        .route("/matching/events", get(super::sse::matching_event_stream))
}
