//! HTTP API handlers for tawo-match
//!
//! REST endpoints for upload, dataset view and matching control, plus an SSE
//! stream of matching events.

pub mod dataset;
pub mod health;
pub mod matching;
pub mod matching_webhook;
pub mod sse;
pub mod upload;

pub use dataset::dataset_routes;
pub use health::health_routes;
pub use matching::matching_routes;
pub use sse::matching_event_stream;
pub use upload::upload_routes;
