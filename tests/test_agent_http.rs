//! HTTP surface of the agent, driven through the router without a socket.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{sample_pdf, standard_store, TEST_PIN};
use docsign_agent::agent::dto::{PdfSignResponse, SignResponse, StatusResponse};
use docsign_agent::agent::AgentHost;
use docsign_agent::config::{AgentConfig, PinPromptMode};
use docsign_agent::signatures::verify_pdf;
use docsign_agent::signing::verify_detached;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn host(store: &std::path::Path, mode: PinPromptMode) -> AgentHost {
    AgentHost::new(
        AgentConfig::new()
            .with_store(store)
            .with_port(0)
            .with_pin_prompt(mode)
            .with_pin_timeout(Duration::from_secs(10)),
    )
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 64 * 1024 * 1024).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn error_kind(body: &Value) -> &str {
    body["error"]["kind"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_status_before_start() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let (status, body) = send(&app, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let status: StatusResponse = serde_json::from_value(body).unwrap();
    assert_eq!(status.state, "not_started");
    assert_eq!(status.version, docsign_agent::VERSION);
    assert_eq!(status.pending_pin_challenges, 0);
    assert!(!status.supports_hardware_pin_entry);
}

#[tokio::test]
async fn test_certificate_listing() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();

    let (status, body) = send(&app, "GET", "/certificates", None).await;
    assert_eq!(status, StatusCode::OK);
    let subjects: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["subject"].as_str().unwrap())
        .collect();
    assert_eq!(subjects, ["CN=Alice", "CN=Carol"]);
    assert_eq!(body[1]["index"], 1);

    let (_, all) = send(&app, "GET", "/certificates?all=true", None).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
    assert_eq!(all[1]["has_private_key"], false);
}

#[tokio::test]
async fn test_sign_detached() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let payload = b"hello agent";
    let (status, body) = send(
        &app,
        "POST",
        "/sign",
        Some(json!({ "cert_index": 0, "payload": STANDARD.encode(payload) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let response: SignResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.certificate_subject, "CN=Alice");
    assert!(!response.signature.is_empty());

    let der = STANDARD.decode(&response.signature).unwrap();
    let verified = verify_detached(&der, payload).unwrap();
    assert_eq!(verified.subject, "CN=Alice");
    assert_eq!(verified.serial_number, response.certificate_serial);
    assert!(verify_detached(&der, b"hello agents").is_err());
}

#[tokio::test]
async fn test_sign_request_errors() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let payload = STANDARD.encode(b"data");

    let (status, body) = send(
        &app,
        "POST",
        "/sign",
        Some(json!({ "cert_index": 0, "thumbprint": "AB", "payload": payload })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid_certificate_selector");

    let (status, body) = send(&app, "POST", "/sign", Some(json!({ "cert_index": 7, "payload": payload }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid_certificate_selector");

    let (status, body) = send(&app, "POST", "/sign", Some(json!({ "cert_index": 0, "payload": "%%%" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid_request");

    let (status, body) = send(
        &app,
        "POST",
        "/sign",
        Some(json!({ "cert_index": 0, "payload": payload, "detached": false })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid_request");

    let (status, body) = send(&app, "POST", "/sign", Some(json!({ "cert_index": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(&body), "invalid_request");
}

#[tokio::test]
async fn test_pin_required_and_invalid_when_deferred() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let payload = STANDARD.encode(b"protected");

    let (status, body) = send(&app, "POST", "/sign", Some(json!({ "cert_index": 1, "payload": payload }))).await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(error_kind(&body), "pin_required");

    let (status, body) = send(
        &app,
        "POST",
        "/sign",
        Some(json!({ "cert_index": 1, "payload": payload, "pin": "0000" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_kind(&body), "pin_invalid");
    assert!(body["error"]["message"].as_str().unwrap().contains("2 attempts remaining"));

    let (status, body) = send(
        &app,
        "POST",
        "/sign",
        Some(json!({ "cert_index": 1, "payload": payload, "pin": TEST_PIN })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["certificate_subject"], "CN=Carol");
}

#[tokio::test]
async fn test_repeated_wrong_pins_lock_certificate() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let payload = STANDARD.encode(b"guess");
    let request = |pin: &str| Some(json!({ "cert_index": 1, "payload": payload, "pin": pin }));

    for remaining in ["2 attempts remaining", "1 attempts remaining"] {
        let (status, body) = send(&app, "POST", "/sign", request("0000")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"]["message"].as_str().unwrap().contains(remaining), "{}", body);
    }

    let (status, body) = send(&app, "POST", "/sign", request("0000")).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(error_kind(&body), "pin_attempts_exhausted");

    // The right PIN no longer helps for this certificate
    let (status, body) = send(&app, "POST", "/sign", request(TEST_PIN)).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(error_kind(&body), "pin_attempts_exhausted");

    // Other certificates are unaffected
    let (status, body) = send(&app, "POST", "/sign", Some(json!({ "cert_index": 0, "payload": payload }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_pin_answered_over_http() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Await).router();
    let payload = STANDARD.encode(b"await me");

    let signer = {
        let app = app.clone();
        tokio::spawn(async move {
            send(&app, "POST", "/sign", Some(json!({ "cert_index": 1, "payload": payload }))).await
        })
    };

    let mut pending = Value::Null;
    for _ in 0..200 {
        let (_, body) = send(&app, "GET", "/pin/pending", None).await;
        if !body.as_array().map(Vec::is_empty).unwrap_or(true) {
            pending = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pending[0]["certificate_subject"], "CN=Carol");
    assert_eq!(pending[0]["reason"], "required");
    assert_eq!(pending[0]["attempts_remaining"], 3);
    let id = pending[0]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", &format!("/pin/{}", id), Some(json!({ "pin": TEST_PIN }))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = signer.await.unwrap();
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["certificate_subject"], "CN=Carol");

    let (status, body) = send(&app, "DELETE", &format!("/pin/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_kind(&body), "input_not_found");
}

#[tokio::test]
async fn test_sign_pdf_defaults_protocol() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let (status, body) = send(
        &app,
        "POST",
        "/sign/pdf",
        Some(json!({
            "cert_index": 0,
            "payload": STANDARD.encode(sample_pdf(1)),
            "reason": "Approved",
            "include_p7s": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let response: PdfSignResponse = serde_json::from_value(body).unwrap();
    let protocol = regex::Regex::new(r"^NS-\d{14}").unwrap();
    assert!(protocol.is_match(&response.protocol), "{}", response.protocol);
    assert!(response.p7s.is_some());

    let pdf = STANDARD.decode(&response.pdf).unwrap();
    let reports = verify_pdf(&pdf).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_valid());
}

#[tokio::test]
async fn test_sign_pdf_rejects_garbage() {
    let store = standard_store();
    let app = host(store.path(), PinPromptMode::Defer).router();
    let (status, body) = send(
        &app,
        "POST",
        "/sign/pdf",
        Some(json!({ "cert_index": 0, "payload": STANDARD.encode(b"not a pdf") })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_kind(&body), "invalid_document");
}
