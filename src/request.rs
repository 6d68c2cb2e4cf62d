use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::errors::{OptidashError, Result};
use crate::models::{ImageResponse, Params, Step};
use crate::response;

/// Request header asking the API for a binary response.
const BINARY_HEADER: &str = "X-Optidash-Binary";

/// Where the image of a request comes from.
pub enum Source {
    /// Upload everything read from the stream.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// Upload a local file, opened when the request is sent.
    Path(PathBuf),
    /// Let the API download the image from a URL.
    Fetch(String),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Reader(_) => f.write_str("Reader(..)"),
            Source::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Source::Fetch(u) => f.debug_tuple("Fetch").field(u).finish(),
        }
    }
}

/// Encoded request body, kept around so retries can resend it.
enum Body {
    Json(Vec<u8>),
    Multipart {
        file: Vec<u8>,
        file_name: String,
        data: String,
    },
}

impl Body {
    fn endpoint(&self) -> &'static str {
        match self {
            Body::Json(_) => "/fetch",
            Body::Multipart { .. } => "/upload",
        }
    }
}

/// A single Optidash API call.
///
/// Created by [`Client::upload`], [`Client::fetch`] and friends. Chain step
/// setters, then finish with exactly one terminal call:
/// [`to_json`](Self::to_json), [`to_stream`](Self::to_stream),
/// [`to_file`](Self::to_file) or [`copy_to`](Self::copy_to). Terminal calls
/// consume the request, so it can only be sent once.
///
/// Step parameters are not validated locally; the API decides which keys are
/// accepted. Setting a step again replaces its previous parameters.
#[must_use = "a request does nothing until a terminal method is awaited"]
pub struct Request<'c> {
    client: &'c Client,
    http: reqwest::Client,
    source: Source,
    steps: BTreeMap<Step, Params>,
    binary: bool,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl<'c> Request<'c> {
    pub(crate) fn new(client: &'c Client, source: Source) -> Self {
        Self {
            client,
            http: client.http().clone(),
            source,
            steps: BTreeMap::new(),
            binary: false,
            timeout: None,
            cancel: None,
        }
    }

    /// Replace the HTTP client used to execute this request.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Bound this request by a timeout, on top of the client-wide one.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Abort the request with [`OptidashError::Cancelled`] when `token` fires.
    ///
    /// Covers reading the upload source, the round trip, and reading or
    /// copying the response body. A stream handed out by
    /// [`to_stream`](Self::to_stream) is owned by the caller and not covered.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set the parameters of an arbitrary step. A `null` value unsets it.
    pub fn step(mut self, step: Step, params: impl Into<Params>) -> Self {
        self.steps.insert(step, params.into());
        self
    }

    /// Image optimization.
    pub fn optimize(self, params: impl Into<Params>) -> Self {
        self.step(Step::Optimize, params)
    }

    /// Horizontal or vertical flipping.
    pub fn flip(self, params: impl Into<Params>) -> Self {
        self.step(Step::Flip, params)
    }

    /// Resizing to a target box.
    pub fn resize(self, params: impl Into<Params>) -> Self {
        self.step(Step::Resize, params)
    }

    /// Scaling by a percentage.
    pub fn scale(self, params: impl Into<Params>) -> Self {
        self.step(Step::Scale, params)
    }

    /// Crop to a region or a detected subject.
    pub fn crop(self, params: impl Into<Params>) -> Self {
        self.step(Step::Crop, params)
    }

    /// Overlay a watermark image.
    pub fn watermark(self, params: impl Into<Params>) -> Self {
        self.step(Step::Watermark, params)
    }

    /// Apply an elliptical mask.
    pub fn mask(self, params: impl Into<Params>) -> Self {
        self.step(Step::Mask, params)
    }

    /// Apply a filter.
    pub fn stylize(self, params: impl Into<Params>) -> Self {
        self.step(Step::Stylize, params)
    }

    /// Adjust visual parameters such as brightness or contrast.
    pub fn adjust(self, params: impl Into<Params>) -> Self {
        self.step(Step::Adjust, params)
    }

    /// Automatic enhancement.
    pub fn auto(self, params: impl Into<Params>) -> Self {
        self.step(Step::Auto, params)
    }

    /// Add a border around the image.
    pub fn border(self, params: impl Into<Params>) -> Self {
        self.step(Step::Border, params)
    }

    /// Pad the image to a given size.
    pub fn padding(self, params: impl Into<Params>) -> Self {
        self.step(Step::Padding, params)
    }

    /// Store the result in external storage.
    ///
    /// Not available together with the binary terminal calls.
    pub fn store(self, params: impl Into<Params>) -> Self {
        self.step(Step::Store, params)
    }

    /// Output format and encoding.
    pub fn output(self, params: impl Into<Params>) -> Self {
        self.step(Step::Output, params)
    }

    /// Deliver the response to a webhook.
    ///
    /// Not available together with the binary terminal calls.
    pub fn webhook(self, params: impl Into<Params>) -> Self {
        self.step(Step::Webhook, params)
    }

    /// Response delivery options. `{"mode": "binary"}` requests a binary body.
    pub fn response(self, params: impl Into<Params>) -> Self {
        self.step(Step::Response, params)
    }

    /// CDN settings.
    pub fn cdn(self, params: impl Into<Params>) -> Self {
        self.step(Step::Cdn, params)
    }

    // -----------------------------------------------------------------------
    // Terminal operations
    // -----------------------------------------------------------------------

    /// Send the request and return the JSON metadata reported by the API.
    ///
    /// # Errors
    ///
    /// - [`OptidashError::Api`] if the API reports `success: false`.
    /// - [`OptidashError::MissingSuccess`] if the response has no `success` flag.
    /// - [`OptidashError::Io`] if the upload source cannot be read.
    pub async fn to_json(self) -> Result<Value> {
        let cancel = self.cancel.clone();
        let response = self.send().await?;
        cancellable(cancel.as_ref(), response::resolve_json(response)).await?
    }

    /// Send the request in binary mode and return the metadata together with
    /// the still-open image body.
    ///
    /// The caller owns the returned stream; dropping it closes the connection.
    ///
    /// # Errors
    ///
    /// - [`OptidashError::BinaryWebhook`] / [`OptidashError::BinaryStorage`]
    ///   if a webhook or store step is set. Nothing is sent in that case.
    /// - [`OptidashError::Api`] if the metadata header reports a failure.
    pub async fn to_stream(mut self) -> Result<ImageResponse> {
        if self.is_set(Step::Webhook) {
            return Err(OptidashError::BinaryWebhook);
        }
        if self.is_set(Step::Store) {
            return Err(OptidashError::BinaryStorage);
        }

        self.binary = true;
        let cancel = self.cancel.clone();
        let response = self.send().await?;
        cancellable(cancel.as_ref(), response::resolve_binary(response)).await?
    }

    /// Send the request in binary mode and write the image to `path`.
    ///
    /// The file is created if missing (with permission bits `mode` on unix)
    /// and truncated otherwise. Returns the metadata reported by the API.
    pub async fn to_file(self, path: impl AsRef<Path>, mode: u32) -> Result<Option<Value>> {
        let cancel = self.cancel.clone();
        let ImageResponse { meta, mut stream } = self.to_stream().await?;

        let mut opts = tokio::fs::OpenOptions::new();
        opts.create(true).write(true).truncate(true);
        #[cfg(unix)]
        opts.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        let mut file = opts.open(path.as_ref()).await?;
        let written =
            cancellable(cancel.as_ref(), tokio::io::copy(&mut stream, &mut file)).await??;
        file.flush().await?;

        tracing::debug!(path = %path.as_ref().display(), bytes = written, "image saved");
        Ok(meta)
    }

    /// Send the request in binary mode and copy the image into `sink`.
    ///
    /// The sink is flushed but not shut down; the response body is released
    /// before returning.
    pub async fn copy_to<W>(self, sink: &mut W) -> Result<Option<Value>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let cancel = self.cancel.clone();
        let ImageResponse { meta, mut stream } = self.to_stream().await?;
        cancellable(cancel.as_ref(), tokio::io::copy(&mut stream, sink)).await??;
        sink.flush().await?;
        Ok(meta)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn is_set(&self, step: Step) -> bool {
        self.steps.get(&step).is_some_and(|p| !p.is_null())
    }

    /// Whether the server should be asked for a binary body.
    fn wants_binary(&self) -> bool {
        self.binary
            || self
                .steps
                .get(&Step::Response)
                .and_then(|r| r.get("mode"))
                .and_then(Value::as_str)
                == Some("binary")
    }

    /// Build the JSON document describing the transformation.
    fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();

        for (step, params) in &self.steps {
            if !params.is_null() {
                payload.insert(step.as_str().to_string(), params.clone());
            }
        }

        if self.binary {
            let response = payload
                .entry(Step::Response.as_str())
                .or_insert_with(|| json!({}));
            if !response.is_object() {
                *response = json!({});
            }
            if let Some(obj) = response.as_object_mut() {
                obj.insert("mode".into(), json!("binary"));
            }
        }

        if let Source::Fetch(url) = &self.source {
            payload.insert("url".into(), Value::String(url.clone()));
        }

        payload
    }

    /// Read the source and encode the outgoing body.
    async fn encode(&mut self) -> Result<Body> {
        match &self.source {
            Source::Path(p) if p.as_os_str().is_empty() => {
                return Err(OptidashError::InvalidSource("file path is empty".into()));
            }
            Source::Fetch(u) if u.is_empty() => {
                return Err(OptidashError::InvalidSource("fetch URL is empty".into()));
            }
            _ => {}
        }

        let data = serde_json::to_string(&self.payload())?;
        let cancel = self.cancel.as_ref();

        let (file, file_name) = match &mut self.source {
            Source::Fetch(_) => return Ok(Body::Json(data.into_bytes())),
            Source::Reader(reader) => {
                let mut file = Vec::new();
                cancellable(cancel, reader.read_to_end(&mut file)).await??;
                (file, "file".to_string())
            }
            Source::Path(path) => {
                let file = cancellable(cancel, tokio::fs::read(path.as_path())).await??;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string());
                (file, name)
            }
        };

        Ok(Body::Multipart {
            file,
            file_name,
            data,
        })
    }

    fn build(&self, body: &Body, binary: bool) -> Result<reqwest::RequestBuilder> {
        let url = self.client.endpoint(body.endpoint());
        let mut req = self
            .http
            .post(url)
            .basic_auth(self.client.api_key(), Some(""));

        req = match body {
            Body::Json(bytes) => req
                .header(CONTENT_TYPE, "application/json")
                .body(bytes.clone()),
            Body::Multipart {
                file,
                file_name,
                data,
            } => {
                let part = Part::bytes(file.clone())
                    .file_name(file_name.clone())
                    .mime_str("application/octet-stream")?;
                let form = Form::new().part("file", part).text("data", data.clone());
                req.multipart(form)
            }
        };

        if binary {
            req = req.header(BINARY_HEADER, "1");
        }
        if let Some(t) = self.timeout {
            req = req.timeout(t);
        }

        Ok(req)
    }

    /// Encode and send the request, retrying transient failures.
    async fn send(mut self) -> Result<reqwest::Response> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(OptidashError::Cancelled);
        }

        let body = self.encode().await?;
        let binary = self.wants_binary();
        let max_retries = self.client.max_retries();

        tracing::debug!(
            endpoint = body.endpoint(),
            binary,
            steps = self.steps.len(),
            "sending request"
        );

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let backoff = self.client.retry_backoff() * (1 << (attempt - 1).min(5));
                cancellable(self.cancel.as_ref(), tokio::time::sleep(backoff)).await?;
            }

            let pending = self.build(&body, binary)?.send();
            let sent = cancellable(self.cancel.as_ref(), pending).await?;
            let retries_left = attempt < max_retries;

            match sent {
                Ok(resp) if retries_left && is_retryable_status(resp.status()) => {
                    tracing::warn!(status = resp.status().as_u16(), attempt, "retrying request");
                }
                Ok(resp) => return Ok(resp),
                Err(e) if retries_left && (e.is_connect() || e.is_timeout()) => {
                    tracing::warn!(error = %e, attempt, "retrying request");
                }
                Err(e) => return Err(OptidashError::Http(e)),
            }

            attempt += 1;
        }
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("source", &self.source)
            .field("steps", &self.steps)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

/// Await `fut` unless the cancellation token fires first.
async fn cancellable<F: Future>(token: Option<&CancellationToken>, fut: F) -> Result<F::Output> {
    match token {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(OptidashError::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
