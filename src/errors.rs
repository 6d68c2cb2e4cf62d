use thiserror::Error;

/// All errors that can occur when using the Optidash SDK.
#[derive(Error, Debug)]
pub enum OptidashError {
    /// The client could not be configured, e.g. the API key is empty.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The request source is unusable (empty path or URL).
    #[error("optidash: invalid request source: {0}")]
    InvalidSource(String),

    /// Binary responses cannot be delivered through a webhook.
    #[error("optidash: webhooks are not supported when using binary responses")]
    BinaryWebhook,

    /// Binary responses cannot be combined with external storage.
    #[error("optidash: external storage is not supported when using binary responses")]
    BinaryStorage,

    /// The response envelope has no boolean `success` field.
    #[error("optidash: success is missing in the response")]
    MissingSuccess,

    /// The envelope reported failure but omitted one of its detail fields.
    #[error("optidash: failed response is missing the `{field}` field")]
    IncompleteError { field: &'static str },

    /// The API processed the request and reported a failure.
    #[error("optidash: [{code}] {message}")]
    Api { code: i64, message: String },

    /// A non-2xx response that did not carry a usable envelope.
    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The caller's cancellation token fired before the response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// A transport-level HTTP error from reqwest.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An I/O error, typically from reading the upload or writing the result.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of the parameters or decoding of the response failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OptidashError {
    /// The remote error code, if this error came from the API.
    pub fn code(&self) -> Option<i64> {
        match self {
            OptidashError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, OptidashError>`.
pub type Result<T> = std::result::Result<T, OptidashError>;
