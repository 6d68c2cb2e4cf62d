use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::io::StreamReader;

use crate::errors::{OptidashError, Result};
use crate::models::ImageResponse;

/// Response header carrying the JSON metadata of a binary response.
pub(crate) const META_HEADER: &str = "X-Optidash-Meta";

/// Validate the `success` envelope shared by JSON bodies and the meta header.
///
/// A `null` document is treated as successful.
pub(crate) fn check_envelope(value: &Value) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }

    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .ok_or(OptidashError::MissingSuccess)?;
    if success {
        return Ok(());
    }

    let code = value
        .get("code")
        .ok_or(OptidashError::IncompleteError { field: "code" })?;
    let message = value
        .get("message")
        .ok_or(OptidashError::IncompleteError { field: "message" })?;

    Err(OptidashError::Api {
        code: code.as_i64().unwrap_or_default(),
        message: message.as_str().unwrap_or_default().to_string(),
    })
}

/// Read the whole body and return it as metadata once the envelope checks out.
pub(crate) async fn resolve_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.bytes().await?;

    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) if !status.is_success() => {
            return Err(OptidashError::UnexpectedStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    check_envelope(&value)?;
    tracing::debug!(status = status.as_u16(), "request succeeded");
    Ok(value)
}

/// Split a binary-mode response into its metadata and the image body.
///
/// On every error path the response is dropped here, which releases the
/// connection; only a successful result hands the body to the caller.
pub(crate) async fn resolve_binary(response: reqwest::Response) -> Result<ImageResponse> {
    let status = response.status();

    // Parsed from raw bytes: the JSON may carry non-ASCII UTF-8.
    let header = response
        .headers()
        .get(META_HEADER)
        .map(|v| serde_json::from_slice::<Value>(v.as_bytes()));

    let meta = match header {
        Some(parsed) => {
            let meta = parsed?;
            check_envelope(&meta)?;
            Some(meta)
        }
        None if !status.is_success() => {
            // No metadata to go by: the body is an error document, not an image.
            let body = response.bytes().await?;
            if let Ok(value) = serde_json::from_slice::<Value>(&body) {
                check_envelope(&value)?;
            }
            return Err(OptidashError::UnexpectedStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        None => None,
    };

    tracing::debug!(
        status = status.as_u16(),
        content_length = response.content_length(),
        "streaming binary response"
    );

    Ok(ImageResponse {
        meta,
        stream: ImageStream::new(response),
    })
}

/// Body of a binary response, read incrementally.
///
/// Implements [`AsyncRead`], so it can be passed to [`tokio::io::copy`] or any
/// other reader-based API. The underlying connection is released when the
/// stream is dropped.
pub struct ImageStream {
    reader: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
}

impl ImageStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        let body = response.bytes_stream().map_err(io::Error::other).boxed();
        Self {
            reader: StreamReader::new(body),
        }
    }

    /// Read the remaining body into memory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl AsyncRead for ImageStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_passes() {
        assert!(check_envelope(&json!({"success": true, "foo": 1})).is_ok());
    }

    #[test]
    fn null_document_is_vacuously_successful() {
        assert!(check_envelope(&Value::Null).is_ok());
    }

    #[test]
    fn failure_carries_code_and_message() {
        let err = check_envelope(&json!({"success": false, "code": 42, "message": "bad input"}))
            .unwrap_err();
        match err {
            OptidashError::Api { code, message } => {
                assert_eq!(code, 42);
                assert_eq!(message, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_success() {
        let err = check_envelope(&json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, OptidashError::MissingSuccess));
    }

    #[test]
    fn non_boolean_success() {
        let err = check_envelope(&json!({"success": "yes"})).unwrap_err();
        assert!(matches!(err, OptidashError::MissingSuccess));
    }

    #[test]
    fn non_object_document_has_no_success() {
        let err = check_envelope(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, OptidashError::MissingSuccess));
    }

    #[test]
    fn failure_without_code() {
        let err = check_envelope(&json!({"success": false, "message": "x"})).unwrap_err();
        assert!(matches!(err, OptidashError::IncompleteError { field: "code" }));
    }

    #[test]
    fn failure_without_message() {
        let err = check_envelope(&json!({"success": false, "code": 1})).unwrap_err();
        assert!(matches!(err, OptidashError::IncompleteError { field: "message" }));
    }

    #[test]
    fn mistyped_details_fall_back_to_defaults() {
        let err = check_envelope(&json!({"success": false, "code": "x", "message": 7})).unwrap_err();
        assert_eq!(err.code(), Some(0));
        assert_eq!(err.to_string(), "optidash: [0] ");
    }
}
