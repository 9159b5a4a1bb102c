//! Integration tests for tawo-match API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt;

/// Fake conversion and matching webhooks
///
/// - `/convert` answers with a JSON array of rows
/// - `/convert-csv` answers with CSV text
/// - `/convert-fail` answers 500
/// - `/match` echoes the request under `echo`
/// - `/match-slow` answers after 2 seconds
fn fake_upstream() -> Router {
    Router::new()
        .route(
            "/convert",
            post(|| async {
                Json(json!([
                    {"type": "REMARK", "rNoPart": "1", "shortText": "Rohbau"},
                    {"type": "NORMAL", "rNoPart": "1.1", "shortText": "Mauerwerk", "qty": 12},
                    {"type": "NORMAL", "rNoPart": "1.2", "shortText": "Beton"},
                    {"type": "REMARK", "rNoPart": "2", "shortText": "Ausbau"},
                    {"type": "NORMAL", "rNoPart": "2.1", "shortText": "Putz"}
                ]))
            }),
        )
        .route(
            "/convert-csv",
            post(|| async {
                (
                    [(header::CONTENT_TYPE, "text/plain")],
                    "Typ;Ordnungszahl;Kurztext\nREMARK;1;Rohbau\nNORMAL;1.1;Mauerwerk\n",
                )
            }),
        )
        .route(
            "/convert-fail",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        )
        .route("/match", post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }))
        .route(
            "/match-slow",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({}))
            }),
        )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn put_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn upload(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(&b"00 GAEB X83 raw bytes"[..]))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tawo-match");
    assert_eq!(body["matching"], "idle");
}

#[tokio::test]
async fn test_endpoints_without_dataset() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;

    let response = app.clone().oneshot(get("/dataset")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let response = app.clone().oneshot(post_json("/matching/start", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/matching/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"]["state"], "idle");
    assert_eq!(body["fingerprint"], Value::Null);
}

#[tokio::test]
async fn test_upload_then_match_then_export() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let transport = FakeTransport::new();
    let (app, driver) = build_test_app(transport.clone(), &upstream).await;

    // Upload
    let response = app
        .clone()
        .oneshot(upload("/api/upload-gaeb?file_name=Rohbau.x83&project_name=Schule"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["row_count"], 5);
    assert_eq!(body["dataset"]["fileName"], "Rohbau.x83");
    assert_eq!(body["dataset"]["projectName"], "Schule");
    assert_eq!(body["dataset"]["margin"], "15,0");
    assert_eq!(body["dataset"]["rows"][1]["qty"], "12");
    let fingerprint = body["fingerprint"].as_str().unwrap().to_string();

    // Dataset view with hierarchy metadata
    let response = app.clone().oneshot(get("/dataset")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["fingerprint"], fingerprint.as_str());
    let starts: Vec<Value> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["section_start"].clone())
        .collect();
    assert_eq!(starts, vec![json!(0), json!(0), json!(0), json!(3), json!(3)]);
    assert_eq!(body["ranges"], json!([{"start": 0, "end": 3}, {"start": 3, "end": 5}]));
    assert_eq!(body["rows"][0]["has_children"], true);
    assert_eq!(body["rows"][1]["depth"], 2);

    let layout = &body["layout"];
    assert_eq!(
        layout["groups"],
        json!([
            {"label": "LV", "colspan": 11},
            {"label": "Technische Einschätzung", "colspan": 3},
            {"label": "KFE / DF", "colspan": 7}
        ])
    );
    assert_eq!(layout["kfe_subgroups"][0]["label"], "Deal Fusion Match");
    assert_eq!(layout["lv_columns"].as_array().unwrap().len(), 11);
    assert_eq!(layout["columns"][0]["key"], "type");
    assert_eq!(layout["columns"][0]["starts_group"], true);
    assert_eq!(layout["columns"][1]["starts_group"], false);
    assert_eq!(layout["columns"][11]["key"], "leistungsgruppe");
    assert_eq!(layout["columns"][11]["group"], "Technische Einschätzung");
    assert_eq!(layout["columns"][11]["starts_group"], true);

    // Matching
    let response = app.clone().oneshot(post_json("/matching/start", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    settle(&driver.handle).await;
    assert_eq!(transport.call_count(), 3);

    let response = app.clone().oneshot(get("/matching/status")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"]["state"], "done");
    assert_eq!(body["fully_sent"], true);
    assert_eq!(body["rows"], json!(["remark", "matched", "matched", "remark", "matched"]));

    let response = app.clone().oneshot(get("/matching/results")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["rows"].as_array().unwrap().len(), 3);
    assert_eq!(body["rows"][0]["candidates"][1]["idWithScore"], "1.1-B (75%)");

    // Selection and reason
    let response = app
        .clone()
        .oneshot(post_json("/matching/rows/4/select", json!({"rank": 1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rank"], 1);
    assert_eq!(body["reason"], "Alternative passt besser");

    let response = app
        .clone()
        .oneshot(put_json("/matching/rows/4/reason", json!({"reason": ""})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(put_json("/matching/rows/4/reason", json!({"reason": "Falsche Putzart"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Export
    let response = app.clone().oneshot(get("/matching/export?format=csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv; charset=utf-8"
    );
    let text = body_text(response).await;
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("Typ;Ordnungszahl;Kurztext"));
    let putz = text.lines().find(|l| l.contains("Putz")).unwrap();
    assert!(putz.contains("2.1-B"));
    assert!(putz.contains("Falsche Putzart"));

    let response = app.oneshot(get("/matching/export?format=xlsx")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resend_missing_conflict_while_sending() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let transport = FakeTransport::new();
    transport.script("1.1", Script::Delay(Duration::from_millis(500), merged_response("1.1")));
    let (app, driver) = build_test_app(transport, &upstream).await;

    let response = app.clone().oneshot(upload("/api/upload-gaeb")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.clone().oneshot(post_json("/matching/start", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json("/matching/resend-missing", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    settle(&driver.handle).await;
    let response = app.oneshot(post_json("/matching/resend-missing", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_csv_message() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app_with(
        FakeTransport::new(),
        &format!("{}/convert-csv", upstream),
        &format!("{}/match", upstream),
    )
    .await;

    let response = app.oneshot(upload("/api/upload-gaeb?file_name=a.x83")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["dataset"]["rows"][1]["shortText"], "Mauerwerk");
}

#[tokio::test]
async fn test_upload_upstream_error_status() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app_with(
        FakeTransport::new(),
        &format!("{}/convert-fail", upstream),
        &format!("{}/match", upstream),
    )
    .await;

    let response = app.clone().oneshot(upload("/api/upload-gaeb")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "Webhook returned status 500"}));

    let response = app.oneshot(get("/health")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["last_error"], "Webhook returned status 500");
}

#[tokio::test]
async fn test_upload_empty_body() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/upload-gaeb")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_matching_webhook_proxy() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/matching-webhook", json!({"rows": [{"type": "NORMAL"}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["echo"]["rows"][0]["type"], "NORMAL");

    let response = app
        .clone()
        .oneshot(post_json("/api/matching-webhook", json!({"rows": "nope"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/api/matching-webhook")
        .body(Body::from("not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_matching_webhook_timeout() {
    let upstream = spawn_upstream(fake_upstream()).await;
    // Matching client timeout is 500ms; /match-slow answers after 2s
    let (app, _driver) = build_test_app_with(
        FakeTransport::new(),
        &format!("{}/convert", upstream),
        &format!("{}/match-slow", upstream),
    )
    .await;

    let response = app
        .oneshot(post_json("/api/matching-webhook", json!({"rows": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "GATEWAY_TIMEOUT");
}

#[tokio::test]
async fn test_edit_cell_endpoint() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;
    app.clone().oneshot(upload("/api/upload-gaeb")).await.unwrap();

    let response = app
        .clone()
        .oneshot(put_json("/dataset/rows/1", json!({"column": "Menge", "value": "14"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["qty"], "14");

    let response = app
        .clone()
        .oneshot(put_json("/dataset/rows/1", json!({"column": "type", "value": "REMARK"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(put_json("/dataset/rows/99", json!({"column": "qty", "value": "1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_stream_opens_with_status() {
    let upstream = spawn_upstream(fake_upstream()).await;
    let (app, _driver) = build_test_app(FakeTransport::new(), &upstream).await;

    let response = app.oneshot(get("/matching/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("no SSE frame")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: DispatchStatus"));
    assert!(text.contains("\"state\":\"idle\""));
}
