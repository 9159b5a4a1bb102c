//! Shared test utilities
//!
//! - Scripted [`FakeTransport`] standing in for the matching service
//! - In-memory driver/app construction
//! - Local axum server as fake upstream for the reqwest-backed clients

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tawo_common::events::EventBus;
use tawo_common::{Dataset, LineItem};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tawo_match::db::ScopedStore;
use tawo_match::services::feedback_notifier::CorrectionFeedback;
use tawo_match::services::{
    DispatchConfig, HttpMatchingClient, MatchingDriver, MatchingError, MatchingHandle, MatchingTransport,
    PayloadEntry, PayloadRowGroup, UploadClient,
};
use tawo_match::AppState;

/// Scripted behaviour for one target row (keyed by its `rNoPart`)
#[derive(Debug, Clone)]
pub enum Script {
    Respond(Value),
    Fail,
    Delay(Duration, Value),
    Panic,
}

/// Matching transport answering from a script
///
/// Rows without a script get [`merged_response`] with three candidates
/// derived from the row path.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, r_no_part: &str, script: Script) {
        self.scripts.lock().unwrap().insert(r_no_part.to_string(), script);
    }

    pub fn clear_scripts(&self) {
        self.scripts.lock().unwrap().clear();
    }

    /// Paths of every submitted target row, in submission order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl MatchingTransport for FakeTransport {
    async fn submit(&self, payload: &PayloadRowGroup) -> Result<Value, MatchingError> {
        let path = match payload.rows.last() {
            Some(PayloadEntry::Row(row)) => row.r_no_part.clone(),
            _ => String::new(),
        };
        self.calls.lock().unwrap().push(path.clone());

        let script = self.scripts.lock().unwrap().get(&path).cloned();
        match script {
            None => Ok(merged_response(&path)),
            Some(Script::Respond(value)) => Ok(value),
            Some(Script::Fail) => Err(MatchingError::Network("connection refused".to_string())),
            Some(Script::Delay(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(Script::Panic) => panic!("scripted transport panic for row {}", path),
        }
    }
}

/// Merged-shape response with three candidates `<path>-A/B/C`
pub fn merged_response(path: &str) -> Value {
    json!({
        "merged_candidates": [
            {"catalog_id": format!("{}-A", path), "score": 0.91, "kurztext": "Erster Treffer"},
            {"catalog_id": format!("{}-B", path), "score": 0.75, "kurztext": "Zweiter Treffer"},
            {"catalog_id": format!("{}-C", path), "score": "0,5", "kurztext": "Dritter Treffer"}
        ],
        "leistungsgruppe": "Mauerarbeiten"
    })
}

pub fn item(kind: &str, r_no_part: &str, short_text: &str) -> LineItem {
    LineItem {
        kind: kind.to_string(),
        r_no_part: r_no_part.to_string(),
        short_text: short_text.to_string(),
        ..Default::default()
    }
}

/// `[REMARK 1, NORMAL 1.1, NORMAL 1.2, NORMAL 1.3]`
pub fn sample_dataset() -> Dataset {
    Dataset::new(
        "Rohbau.x83",
        vec![
            item("REMARK", "1", "Rohbau"),
            item("NORMAL", "1.1", "Mauerwerk"),
            item("NORMAL", "1.2", "Beton"),
            item("NORMAL", "1.3", "Estrich"),
        ],
    )
}

/// Single-connection in-memory database with tables created
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    tawo_match::db::init_tables(&pool)
        .await
        .expect("Failed to initialize tables");
    pool
}

/// A running driver over an in-memory store
pub struct TestDriver {
    pub pool: SqlitePool,
    pub store: ScopedStore,
    pub handle: MatchingHandle,
    pub event_bus: EventBus,
    pub feedback_rx: mpsc::UnboundedReceiver<CorrectionFeedback>,
    pub shutdown: CancellationToken,
}

impl Drop for TestDriver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        row_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub async fn spawn_driver(transport: Arc<FakeTransport>) -> TestDriver {
    let pool = memory_pool().await;
    spawn_driver_on(pool, transport, test_config())
}

/// Driver over an existing pool (simulates a restart when the pool is shared)
pub fn spawn_driver_on(pool: SqlitePool, transport: Arc<FakeTransport>, config: DispatchConfig) -> TestDriver {
    let store = ScopedStore::new(pool.clone());
    let event_bus = EventBus::new(256);
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let handle = MatchingDriver::spawn(
        store.clone(),
        transport,
        event_bus.clone(),
        feedback_tx,
        config,
        shutdown.clone(),
    );

    TestDriver {
        pool,
        store,
        handle,
        event_bus,
        feedback_rx,
        shutdown,
    }
}

/// Wait for the running pass to settle (bounded)
pub async fn settle(handle: &MatchingHandle) -> tawo_match::models::DispatchStatus {
    tokio::time::timeout(Duration::from_secs(10), handle.wait_until_settled())
        .await
        .expect("pass did not settle in time")
        .expect("driver stopped")
}

/// Router over a fake-transport driver
///
/// Upload and proxy clients point at `<upstream_url>/convert` and
/// `<upstream_url>/match`.
pub async fn build_test_app(transport: Arc<FakeTransport>, upstream_url: &str) -> (Router, TestDriver) {
    build_test_app_with(
        transport,
        &format!("{}/convert", upstream_url),
        &format!("{}/match", upstream_url),
    )
    .await
}

/// Router with explicit conversion and matching webhook URLs
///
/// The matching client times out after 500ms.
pub async fn build_test_app_with(
    transport: Arc<FakeTransport>,
    upload_url: &str,
    matching_url: &str,
) -> (Router, TestDriver) {
    let driver = spawn_driver(transport).await;

    let upload_client = UploadClient::new(upload_url, Duration::from_secs(5)).expect("upload client");
    let matching_client =
        Arc::new(HttpMatchingClient::new(matching_url, Duration::from_millis(500)).expect("matching client"));

    let state = AppState::new(
        driver.pool.clone(),
        driver.event_bus.clone(),
        driver.handle.clone(),
        upload_client,
        matching_client,
    );

    (tawo_match::build_router(state), driver)
}

/// Serve `router` on an ephemeral local port, returning its base URL
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}
