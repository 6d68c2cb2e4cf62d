//! Binary-mode terminal calls: streams, files and sinks.

mod common;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use optidash::{CancellationToken, Client, ClientBuilder, OptidashError};
use reqwest::header::HeaderValue;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use wiremock::matchers::{any, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png-but-close-enough";

fn client_for(server: &MockServer) -> Client {
    ClientBuilder::new()
        .api_key("test-key")
        .base_url(server.uri())
        .max_retries(0)
        .build()
        .unwrap()
}

async fn mount_image(server: &MockServer, meta: &str) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("X-Optidash-Binary", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Optidash-Meta", meta)
                .set_body_bytes(IMAGE),
        )
        .mount(server)
        .await;
}

async fn mount_nothing(server: &MockServer) {
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(server)
        .await;
}

/// Records whether the writer was shut down.
#[derive(Default)]
struct TrackingSink {
    data: Vec<u8>,
    shut_down: bool,
}

impl AsyncWrite for TrackingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down = true;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn stream_yields_the_exact_body() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":true,"output":{"width":10}}"#).await;

    let response = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .resize(json!({ "width": 10 }))
        .to_stream()
        .await
        .unwrap();

    let meta = response.meta.unwrap();
    assert_eq!(meta["output"]["width"], 10);

    let mut stream = response.stream;
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, IMAGE);
}

#[tokio::test]
async fn utf8_meta_header_is_accepted() {
    let server = MockServer::start().await;
    let meta = HeaderValue::from_bytes(r#"{"success":true,"output":{"name":"café.jpg"}}"#.as_bytes())
        .unwrap();

    Mock::given(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Optidash-Meta", meta)
                .set_body_bytes(IMAGE),
        )
        .mount(&server)
        .await;

    let response = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_stream()
        .await
        .unwrap();

    assert_eq!(response.meta.unwrap()["output"]["name"], "café.jpg");
    assert_eq!(response.stream.into_bytes().await.unwrap(), IMAGE);
}

#[tokio::test]
async fn copy_is_cancelled_while_the_body_stalls() {
    let uri = common::stalling_server(
        format!(
            "HTTP/1.1 200 OK\r\nX-Optidash-Meta: {{\"success\":true}}\r\nContent-Length: {}",
            IMAGE.len() * 10
        ),
        IMAGE,
    )
    .await;
    let client = ClientBuilder::new()
        .api_key("test-key")
        .base_url(uri)
        .max_retries(0)
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let mut sink = TrackingSink::default();
    let err = client
        .upload_bytes(b"input".to_vec())
        .cancel_on(token)
        .copy_to(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, OptidashError::Cancelled), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!sink.shut_down);
}

#[tokio::test]
async fn binary_mode_is_announced_in_the_payload() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":true}"#).await;

    let response = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_stream()
        .await
        .unwrap();
    assert_eq!(response.stream.into_bytes().await.unwrap(), IMAGE);

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains(r#"{"response":{"mode":"binary"}}"#));
}

#[tokio::test]
async fn missing_meta_header_on_success_still_streams() {
    let server = MockServer::start().await;

    Mock::given(path("/fetch"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .fetch("https://example.com/a.png")
        .to_stream()
        .await
        .unwrap();

    assert!(response.meta.is_none());
    assert_eq!(response.stream.into_bytes().await.unwrap(), IMAGE);
}

#[tokio::test]
async fn webhook_is_rejected_before_sending() {
    let server = MockServer::start().await;
    mount_nothing(&server).await;

    let err = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .webhook(json!({ "url": "https://example.com/hook" }))
        .to_stream()
        .await
        .unwrap_err();

    assert!(matches!(err, OptidashError::BinaryWebhook));
    server.verify().await;
}

#[tokio::test]
async fn store_is_rejected_before_sending() {
    let server = MockServer::start().await;
    mount_nothing(&server).await;

    let mut sink = Vec::new();
    let err = client_for(&server)
        .fetch("https://example.com/a.png")
        .store(json!({ "provider": "s3", "bucket": "images" }))
        .copy_to(&mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, OptidashError::BinaryStorage));
    assert!(sink.is_empty());
    server.verify().await;
}

#[tokio::test]
async fn failed_meta_becomes_an_api_error() {
    let server = MockServer::start().await;
    mount_image(
        &server,
        r#"{"success":false,"code":415,"message":"Unsupported format"}"#,
    )
    .await;

    let err = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_stream()
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(415));
    assert_eq!(err.to_string(), "optidash: [415] Unsupported format");
}

#[tokio::test]
async fn meta_without_success_is_an_envelope_error() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"output":{}}"#).await;

    let err = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_stream()
        .await
        .unwrap_err();

    assert!(matches!(err, OptidashError::MissingSuccess));
}

#[tokio::test]
async fn error_body_without_meta_is_resolved() {
    let server = MockServer::start().await;

    Mock::given(path("/upload"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "code": 400,
            "message": "Missing image",
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .upload_bytes(Vec::new())
        .to_stream()
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(400));
}

#[tokio::test]
async fn copy_to_leaves_the_sink_open() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":true}"#).await;

    let mut sink = TrackingSink::default();
    let meta = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .copy_to(&mut sink)
        .await
        .unwrap();

    assert_eq!(meta, Some(json!({ "success": true })));
    assert_eq!(sink.data, IMAGE);
    assert!(!sink.shut_down);

    sink.write_all(b"!").await.unwrap();
    assert_eq!(sink.data.len(), IMAGE.len() + 1);
}

#[tokio::test]
async fn to_file_creates_a_new_file() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":true}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("result.png");
    assert!(!out.exists());

    let meta = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_file(&out, 0o600)
        .await
        .unwrap();

    assert!(meta.is_some());
    assert_eq!(std::fs::read(&out).unwrap(), IMAGE);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn to_file_truncates_an_existing_file() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":true}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("result.png");
    std::fs::write(&out, vec![b'x'; IMAGE.len() * 4]).unwrap();

    client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_file(&out, 0o644)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&out).unwrap(), IMAGE);
}

#[tokio::test]
async fn to_file_does_not_touch_the_path_on_api_error() {
    let server = MockServer::start().await;
    mount_image(&server, r#"{"success":false,"code":500,"message":"boom"}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("result.png");

    let err = client_for(&server)
        .upload_bytes(b"input".to_vec())
        .to_file(&out, 0o644)
        .await
        .unwrap_err();

    assert!(matches!(err, OptidashError::Api { code: 500, .. }));
    assert!(!out.exists());
}
