use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncRead;

use crate::errors::{OptidashError, Result};
use crate::request::{Request, Source};

const DEFAULT_BASE_URL: &str = "https://api.optidash.ai/1.0";
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const API_KEY_ENV: &str = "OPTIDASH_API_KEY";

/// Builder for constructing a [`Client`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use optidash::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> optidash::Result<()> {
/// let client = ClientBuilder::new()
///     .api_key("your-api-key")
///     .max_retries(5)
///     .timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    api_key: Option<String>,
    base_url: String,
    max_retries: u32,
    retry_backoff: Duration,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            http: None,
        }
    }

    /// Set the API key for authentication.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the base URL (defaults to `https://api.optidash.ai/1.0`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the maximum number of retries for transient errors (defaults to 2).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Delay before the first retry; doubled on each further attempt (defaults to 1 second).
    pub fn retry_backoff(mut self, d: Duration) -> Self {
        self.retry_backoff = d;
        self
    }

    /// Set the HTTP request timeout (defaults to 60 seconds).
    ///
    /// Ignored when a custom client is supplied through [`http_client`](Self::http_client).
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Use a preconfigured reqwest client for all requests.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the [`Client`].
    ///
    /// If no API key was set via [`api_key`](Self::api_key), the builder will
    /// attempt to read the `OPTIDASH_API_KEY` environment variable.
    ///
    /// Returns [`OptidashError::Config`] if no non-empty key is available.
    pub fn build(self) -> Result<Client> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| OptidashError::Config {
                message: "API key is empty. Pass it to ClientBuilder::api_key() \
                          or set the OPTIDASH_API_KEY environment variable."
                    .into(),
            })?;

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(OptidashError::Http)?,
        };

        Ok(Client {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::new(api_key),
            http,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The Optidash API client.
///
/// A client is cheap to clone and can be shared between tasks; every call to
/// [`upload`](Self::upload) or [`fetch`](Self::fetch) starts an independent
/// [`Request`].
///
/// # Example
///
/// ```no_run
/// use optidash::Client;
/// use serde_json::json;
///
/// # async fn example() -> optidash::Result<()> {
/// let client = Client::new("your-api-key")?;
///
/// let meta = client
///     .fetch("https://example.com/photo.jpg")
///     .resize(json!({ "width": 640, "height": 480 }))
///     .to_file("photo-640.jpg", 0o644)
///     .await?;
/// println!("{meta:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    base_url: String,
    api_key: SecretString,
    http: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Client {
    /// Create a new client with the given API key and default settings.
    ///
    /// Returns [`OptidashError::Config`] if the key is empty. For
    /// customization, use [`ClientBuilder`] instead.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        ClientBuilder::new().api_key(api_key).build()
    }

    /// Start a request that uploads the file at `path`.
    ///
    /// The file is opened only when the request is sent, so a missing file
    /// surfaces as [`OptidashError::Io`] from the terminal call.
    pub fn upload(&self, path: impl AsRef<Path>) -> Request<'_> {
        self.request(Source::Path(path.as_ref().to_path_buf()))
    }

    /// Start a request that uploads everything read from `reader`.
    pub fn upload_reader<R>(&self, reader: R) -> Request<'_>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.request(Source::Reader(Box::new(reader)))
    }

    /// Start a request that uploads an in-memory image.
    pub fn upload_bytes(&self, bytes: impl Into<Vec<u8>>) -> Request<'_> {
        self.upload_reader(std::io::Cursor::new(bytes.into()))
    }

    /// Start a request that lets the API download the image from `url`.
    pub fn fetch(&self, url: impl Into<String>) -> Request<'_> {
        self.request(Source::Fetch(url.into()))
    }

    /// Start a request from an explicit [`Source`].
    pub fn request(&self, source: Source) -> Request<'_> {
        Request::new(self, source)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub(crate) fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }
}
