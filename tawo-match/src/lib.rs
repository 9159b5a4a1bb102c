//! tawo-match library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tawo_common::events::EventBus;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::ScopedStore;
use crate::services::{HttpMatchingClient, MatchingHandle, UploadClient};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Scoped key-value store over the database pool
    pub store: ScopedStore,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Handle to the dispatch driver task
    pub matching: MatchingHandle,
    /// Conversion webhook client
    pub upload_client: UploadClient,
    /// Matching webhook client, used by the proxy endpoint
    pub matching_client: Arc<HttpMatchingClient>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        matching: MatchingHandle,
        upload_client: UploadClient,
        matching_client: Arc<HttpMatchingClient>,
    ) -> Self {
        Self {
            store: ScopedStore::new(db),
            event_bus,
            matching,
            upload_client,
            matching_client,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember an upstream failure for the health endpoint
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::dataset_routes())
        .merge(api::matching_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
