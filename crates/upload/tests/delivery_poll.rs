//! Delivery polling against a wiremock server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ascflow_client::{ClientError, JsonTransport, RetryPolicy, SessionConfig};
use ascflow_token::PrivateKeySource;
use ascflow_upload::{DeliveryPoller, PollConfig, UploadError};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRIVATE_KEY: &str = include_str!("../../token/testdata/AuthKey_TESTKEY123.p8");
const ASSET_PATH: &str = "/v1/appPreviews/p1";

fn poller(server: &MockServer, max_tries: u32) -> DeliveryPoller {
    let config = SessionConfig::new("issuer-1", "TESTKEY123")
        .with_private_key(PrivateKeySource::Pem(PRIVATE_KEY.into()))
        .with_base_url(format!("{}/v1", server.uri()))
        .with_retry(RetryPolicy::immediate(5));
    let transport = JsonTransport::from_config(&config).expect("failed to build transport");
    DeliveryPoller::new(
        Arc::new(transport),
        PollConfig {
            delay: Duration::from_millis(1),
            max_tries,
        },
    )
}

fn asset_url(server: &MockServer) -> String {
    format!("{}{ASSET_PATH}", server.uri())
}

fn state_body(state: &str, errors: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "data": {
            "type": "appPreviews",
            "id": "p1",
            "attributes": {
                "assetDeliveryState": {"state": state, "errors": errors, "warnings": []}
            }
        }
    }))
}

async fn mount_state(server: &MockServer, state: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(state_body(state, json!([])))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn completes_after_processing() {
    let server = MockServer::start().await;
    mount_state(&server, "UPLOAD_COMPLETE", 2).await;
    mount_state(&server, "COMPLETE", 1).await;

    poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "preview", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn relative_path_resolves_against_base_url() {
    let server = MockServer::start().await;
    mount_state(&server, "COMPLETE", 1).await;

    poller(&server, 60)
        .poll_for_upload_success("appPreviews/p1", "", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_state_reports_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(state_body(
            "FAILED",
            json!([{"code": "IMAGE_BAD_DIMENSIONS", "description": "wrong size"}]),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "preview", &CancellationToken::new())
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("IMAGE_BAD_DIMENSIONS"), "{message}");
    match err {
        UploadError::DeliveryFailed { label, errors, .. } => {
            assert_eq!(label, "preview");
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].description(), Some("wrong size"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn gives_up_after_max_tries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(state_body("PROCESSING", json!([])))
        .expect(60)
        .mount(&server)
        .await;

    let err = poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "preview", &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        UploadError::PollTimedOut {
            last_state, tries, ..
        } => {
            assert_eq!(*tries, 60);
            assert_eq!(last_state.as_deref(), Some("PROCESSING"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let message = err.to_string();
    assert!(message.contains("60 tries"), "{message}");
    assert!(message.contains("PROCESSING"), "{message}");
}

#[tokio::test]
async fn zero_max_tries_polls_until_terminal() {
    let server = MockServer::start().await;
    mount_state(&server, "PROCESSING", 75).await;
    mount_state(&server, "COMPLETE", 1).await;

    poller(&server, 0)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn transient_server_errors_are_polled_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_raw(
            r#"{"errors":[{"status":"500","code":"UNEXPECTED_ERROR","title":"try again"}]}"#,
            "application/json",
        ))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_state(&server, "COMPLETE", 1).await;

    poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn other_fetch_errors_propagate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_raw(
            r#"{"errors":[{"status":"404","code":"NOT_FOUND"}]}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        UploadError::Client(ClientError::Api { status, .. }) => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_state_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"type": "appPreviews", "id": "p1", "attributes": {"fileName": "movie.mp4"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        UploadError::MissingDeliveryState { body, .. } => assert!(body.contains("movie.mp4")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancel_stops_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(state_body("PROCESSING", json!([])))
        .mount(&server)
        .await;

    let config = SessionConfig::new("issuer-1", "TESTKEY123")
        .with_private_key(PrivateKeySource::Pem(PRIVATE_KEY.into()))
        .with_base_url(format!("{}/v1", server.uri()));
    let transport = Arc::new(JsonTransport::from_config(&config).unwrap());
    let poller = DeliveryPoller::new(
        transport,
        PollConfig {
            delay: Duration::from_secs(30),
            max_tries: 0,
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = poller
        .poll_for_upload_success(&asset_url(&server), "", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Cancelled), "got {err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn failed_state_with_null_warnings_reports_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"type": "appPreviews", "id": "p1", "attributes": {"assetDeliveryState": {
                "state": "FAILED",
                "errors": [{"code": "IMAGE_TOOL_FAILURE", "description": "bad frame",
                            "extra": {"frame": 3}}],
                "warnings": null
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = poller(&server, 60)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        UploadError::DeliveryFailed { errors, .. } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code(), Some("IMAGE_TOOL_FAILURE"));
            assert_eq!(errors[0].0["extra"]["frame"], 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn transient_errors_count_toward_max_tries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_raw(
            r#"{"errors":[{"status":"500","code":"UNEXPECTED_ERROR"}]}"#,
            "application/json",
        ))
        .expect(4)
        .mount(&server)
        .await;

    let err = poller(&server, 4)
        .poll_for_upload_success(&asset_url(&server), "", &CancellationToken::new())
        .await
        .unwrap_err();
    match &err {
        UploadError::PollTimedOut {
            last_state, tries, ..
        } => {
            assert_eq!(*tries, 4);
            assert_eq!(*last_state, None);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().ends_with("upload state was unknown after 4 tries"));
}
