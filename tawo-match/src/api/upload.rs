//! GAEB upload endpoint
//!
//! POST /api/upload-gaeb forwards the raw body to the conversion webhook,
//! turns the answer into line items and stores them as the current dataset.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tawo_common::dataset::DEFAULT_MARGIN;
use tawo_common::{Dataset, Fingerprint};
use tracing::{info, warn};

use crate::services::gaeb_upload;
use crate::{ApiError, ApiResult, AppState};

/// File name used when the client sends none
const DEFAULT_FILE_NAME: &str = "upload.x83";

/// Query parameters of the upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
    pub project_name: Option<String>,
    pub margin: Option<String>,
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub fingerprint: Fingerprint,
    pub row_count: usize,
    pub dataset: Dataset,
}

/// POST /api/upload-gaeb
///
/// **Errors:**
/// - 400 Bad Request: empty body
/// - upstream status: conversion webhook answered non-2xx
/// - 502 Bad Gateway: webhook unreachable or no usable rows
/// - 504 Gateway Timeout: webhook did not answer in time
pub async fn upload_gaeb(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Upload body is empty".to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let converted = match state.upload_client.forward(body.to_vec(), &content_type).await {
        Ok(converted) => converted,
        Err(e) => {
            warn!(error = %e, "GAEB conversion failed");
            state.record_error(e.to_string()).await;
            return Err(e.into());
        }
    };

    let rows = gaeb_upload::rows_from_response(&converted).map_err(|e| {
        warn!(error = %e, "Conversion response unusable");
        ApiError::from(e)
    })?;

    let mut dataset = Dataset::new(non_blank(query.file_name).unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()), rows);
    dataset.project_name = non_blank(query.project_name).unwrap_or_default();
    dataset.margin = non_blank(query.margin).unwrap_or_else(|| DEFAULT_MARGIN.to_string());

    let fingerprint = state.matching.replace_dataset(dataset.clone()).await?;
    info!(
        fingerprint = %fingerprint,
        file_name = %dataset.file_name,
        rows = dataset.rows.len(),
        "GAEB upload stored"
    );

    Ok(Json(UploadResponse {
        fingerprint,
        row_count: dataset.rows.len(),
        dataset,
    }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Build upload and webhook proxy routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/upload-gaeb", post(upload_gaeb))
        .route(
            "/api/matching-webhook",
            post(super::matching_webhook::proxy_matching_request),
        )
}
