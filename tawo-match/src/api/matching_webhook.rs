//! Matching webhook proxy
//!
//! POST /api/matching-webhook passes a `{rows: [...]}` body through to the
//! matching service and returns its JSON answer.

use axum::{body::Bytes, extract::State, Json};
use serde_json::Value;
use tracing::warn;

use crate::services::MatchingError;
use crate::{ApiError, ApiResult, AppState};

/// POST /api/matching-webhook
///
/// **Errors:**
/// - 400 Bad Request: body is not JSON or `rows` is not an array
/// - 504 Gateway Timeout: matching service did not answer in time
/// - upstream status: matching service answered non-2xx
/// - 502 Bad Gateway: matching service unreachable or answered non-JSON
pub async fn proxy_matching_request(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))?;

    if !request.get("rows").is_some_and(Value::is_array) {
        return Err(ApiError::BadRequest("Expected body of the form {rows: [...]}".to_string()));
    }

    match state.matching_client.post_json(&request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!(error = %e, url = %state.matching_client.url(), "Matching proxy request failed");
            state.record_error(e.to_string()).await;
            Err(match e {
                MatchingError::Timeout(timeout) => ApiError::GatewayTimeout(format!(
                    "Matching service did not answer within {} seconds; the workflow may still be running",
                    timeout.as_secs()
                )),
                other => other.into(),
            })
        }
    }
}
