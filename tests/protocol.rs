//! Wire-level tests for the conversion flow.
//!
//! Each test starts a wiremock server standing in for the conversion
//! backend and drives a real `ConversionController` over `HttpTransport`.
//!
//! Run with:
//!   cargo test --test protocol

use serde_json::json;
use statement_converter::{
    BankRegistry, ClientConfig, ConversionController, ConverterError, FailureKind, Phase,
    SubmitBlocker, UploadedFile,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

const CONVERT: &str = "/api/convert-suggest";
const APPROVE: &str = "/api/approve";

/// Route library logs through the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn controller_for(base_url: &str) -> ConversionController {
    init_tracing();
    let config = ClientConfig::builder()
        .base_url(base_url)
        .request_timeout_secs(5)
        .connect_timeout_secs(2)
        .build()
        .expect("valid config");
    ConversionController::connect(&config, Arc::new(BankRegistry::builtin()))
        .expect("controller")
}

fn statement() -> UploadedFile {
    UploadedFile::new("statement.csv", b"data;valor\nUBER TRIP;-23,90\n".to_vec())
}

fn uber_body() -> serde_json::Value {
    json!({
        "suggestions": [{ "texto": "UBER TRIP", "sugestao": "Transporte", "tipo": "E" }],
        "outputFile": "out123.xlsx"
    })
}

async fn mount_convert(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(CONVERT))
        .respond_with(response)
        .mount(server)
        .await;
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_approve_download() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CONVERT))
        .and(body_string_contains("name=\"statement\"; filename=\"statement.csv\""))
        .and(body_string_contains("name=\"bank\""))
        .and(body_string_contains("XP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(uber_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(APPROVE))
        .and(body_json(json!([{ "texto": "UBER TRIP", "sugestao": "Transporte" }])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/output/out123.xlsx"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04converted".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();

    let review = assert_ok!(c.submit().await);
    assert_eq!(review.phase, Phase::SuggestionsPending);
    assert_eq!(review.suggestions.len(), 1);
    assert_eq!(review.suggestions[0].category, "Transporte");
    assert_eq!(review.output_reference.as_deref(), Some("out123.xlsx"));
    assert!(review.can_approve);
    assert!(!review.can_download);

    let done = assert_ok!(c.approve().await);
    assert_eq!(done.phase, Phase::Completed);
    assert!(done.suggestions.is_empty());
    assert!(done.can_download);

    let artifact = c.download().unwrap();
    assert_eq!(artifact.reference, "out123.xlsx");
    assert_eq!(artifact.url.as_str(), format!("{}/output/out123.xlsx", server.uri()));
    assert_eq!(artifact.file_name, "statement_convertido.xlsx");

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join(&artifact.file_name);
    let written = c.download_to(&target).await.unwrap();
    assert_eq!(written, 13);
    assert_eq!(std::fs::read(&target).unwrap(), b"PK\x03\x04converted");
}

#[tokio::test]
async fn credential_is_sent_as_password_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CONVERT))
        .and(body_string_contains("name=\"password\""))
        .and(body_string_contains("s3cret"))
        .and(body_string_contains("C6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(uber_body()))
        .expect(1)
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("C6").unwrap();
    c.set_credential("s3cret").unwrap();
    assert_ok!(c.submit().await);
}

#[tokio::test]
async fn empty_suggestions_complete_without_approval_call() {
    let server = MockServer::start().await;
    mount_convert(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "suggestions": [], "outputFile": "x.xlsx" })),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(APPROVE))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("Itau").unwrap();
    c.submit().await.unwrap();

    let done = c.approve().await.unwrap();
    assert_eq!(done.phase, Phase::Completed);
    assert_eq!(c.download().unwrap().reference, "x.xlsx");
}

// ── Client-side validation ───────────────────────────────────────────────────

#[tokio::test]
async fn missing_credential_never_hits_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(uber_body()))
        .expect(0)
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    let snap = c.select_bank("C6").unwrap();
    assert!(!snap.can_submit);
    assert_eq!(snap.submit_blocker, Some(SubmitBlocker::MissingCredential));

    let err = assert_err!(c.submit().await);
    assert!(matches!(err, ConverterError::MissingCredential { ref bank } if bank == "C6"));

    // A blank credential does not count.
    c.set_credential("   ").unwrap();
    assert_err!(c.submit().await);
}

#[tokio::test]
async fn unsupported_file_type_is_rejected_locally() {
    let c = controller_for("http://127.0.0.1:1");
    let err = c
        .select_file(UploadedFile::new("notes.txt", b"hello".to_vec()))
        .unwrap_err();
    assert!(matches!(err, ConverterError::UnsupportedFileType { .. }));
    assert_eq!(c.snapshot().phase, Phase::Empty);
}

// ── Backend failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_password_keeps_inputs_for_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CONVERT))
        .and(body_string_contains("wrong"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid password" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CONVERT))
        .and(body_string_contains("right"))
        .respond_with(ResponseTemplate::new(200).set_body_json(uber_body()))
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("C6").unwrap();
    c.set_credential("wrong").unwrap();

    let err = c.submit().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::InvalidCredential));
    assert_eq!(err.to_string(), "invalid password");

    let snap = c.snapshot();
    assert_eq!(snap.phase, Phase::Errored);
    assert_eq!(snap.error_message(), Some("invalid password"));
    assert_eq!(snap.file_name.as_deref(), Some("statement.csv"));
    assert_eq!(snap.bank.as_deref(), Some("C6"));
    assert!(snap.credential_present);
    assert!(snap.can_submit);

    // Editing the credential clears the error.
    let snap = c.set_credential("right").unwrap();
    assert_eq!(snap.phase, Phase::Ready);
    assert!(snap.error.is_none());

    let snap = c.submit().await.unwrap();
    assert_eq!(snap.phase, Phase::SuggestionsPending);
}

#[tokio::test]
async fn explicit_error_code_drives_the_kind() {
    let server = MockServer::start().await;
    mount_convert(
        &server,
        ResponseTemplate::new(500)
            .set_body_json(json!({ "error": "layout not recognised", "code": "unsupported_format" })),
    )
    .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("Avenue").unwrap();
    let err = c.submit().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::UnsupportedFormat));
    assert_eq!(err.to_string(), "layout not recognised");
}

#[tokio::test]
async fn server_error_without_body_gets_generic_message() {
    let server = MockServer::start().await;
    mount_convert(&server, ResponseTemplate::new(500)).await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();
    let err = c.submit().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::ServerError));

    let snap = c.snapshot();
    let message = snap.error_message().unwrap();
    assert!(
        message.starts_with(statement_converter::transport::GENERIC_CONVERT_ERROR),
        "got: {message}"
    );
}

#[tokio::test]
async fn malformed_success_body_is_a_network_error() {
    let server = MockServer::start().await;
    mount_convert(
        &server,
        ResponseTemplate::new(200).set_body_string("<html>proxy login</html>"),
    )
    .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();
    let err = c.submit().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::NetworkError));
    assert_eq!(c.snapshot().phase, Phase::Errored);
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let c = controller_for("http://127.0.0.1:1");
    c.select_file(statement()).unwrap();
    c.select_bank("Clear").unwrap();

    let err = c.submit().await.unwrap_err();
    assert_eq!(err.failure_kind(), Some(FailureKind::NetworkError));
    let snap = c.snapshot();
    assert_eq!(snap.phase, Phase::Errored);
    assert!(snap.can_submit);
}

#[tokio::test]
async fn approval_failure_keeps_suggestions_for_retry() {
    let server = MockServer::start().await;
    mount_convert(&server, ResponseTemplate::new(200).set_body_json(uber_body())).await;
    Mock::given(method("POST"))
        .and(path(APPROVE))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "db locked" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(APPROVE))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();
    c.submit().await.unwrap();

    let err = c.approve().await.unwrap_err();
    assert_eq!(err.to_string(), "db locked");
    let snap = c.snapshot();
    assert_eq!(snap.phase, Phase::Errored);
    assert_eq!(snap.suggestions.len(), 1);
    assert!(snap.can_approve);
    assert!(!snap.can_submit);
    assert!(!snap.can_download);

    let snap = c.approve().await.unwrap();
    assert_eq!(snap.phase, Phase::Completed);
}

// ── Download ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_artifact_reports_download_failure() {
    let server = MockServer::start().await;
    mount_convert(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "suggestions": [], "outputFile": "gone.xlsx" })),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/output/gone.xlsx"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();
    c.submit().await.unwrap();
    c.approve().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.xlsx");
    let err = c.download_to(&target).await.unwrap_err();
    assert!(matches!(err, ConverterError::DownloadFailed { .. }), "got {err:?}");
    assert!(!target.exists());
}

#[tokio::test]
async fn new_file_after_completion_starts_over() {
    let server = MockServer::start().await;
    mount_convert(&server, ResponseTemplate::new(200).set_body_json(uber_body())).await;
    Mock::given(method("POST"))
        .and(path(APPROVE))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let c = controller_for(&server.uri());
    c.select_file(statement()).unwrap();
    c.select_bank("XP").unwrap();
    c.submit().await.unwrap();
    c.approve().await.unwrap();
    assert!(c.snapshot().can_download);

    let snap = c
        .select_file(UploadedFile::new("april.pdf", b"%PDF-1.7".to_vec()))
        .unwrap();
    assert_eq!(snap.phase, Phase::FileSelected);
    assert!(snap.suggestions.is_empty());
    assert_eq!(snap.output_reference, None);
    assert!(matches!(c.download(), Err(ConverterError::NoOutputAvailable)));
}
