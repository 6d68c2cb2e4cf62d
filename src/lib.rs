//! # Optidash SDK for Rust
//!
//! Async Rust client for the [Optidash](https://optidash.ai) image
//! optimization and processing API. Upload a local file or stream, or let the
//! API fetch a remote URL, chain transformation steps, and get back either the
//! JSON metadata or the processed image itself.
//!
//! ## Quick start
//!
//! ```no_run
//! use optidash::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> optidash::Result<()> {
//!     let client = Client::new("your-api-key")?;
//!
//!     // Process a local file and receive a hosted URL in the metadata
//!     let meta = client
//!         .upload("photo.jpg")
//!         .optimize(json!({ "compression": "medium" }))
//!         .resize(json!({ "width": 1280 }))
//!         .to_json()
//!         .await?;
//!     println!("{}", meta["output"]["url"]);
//!
//!     // Or download the result directly
//!     client
//!         .fetch("https://example.com/photo.jpg")
//!         .scale(json!({ "width": 50 }))
//!         .to_file("photo-small.jpg", 0o644)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Binary responses
//!
//! [`Request::to_stream`], [`Request::to_file`] and [`Request::copy_to`] ask
//! the API to return the image bytes instead of a JSON document. The metadata
//! then arrives in a response header. Binary responses cannot be combined with
//! the `webhook` or `store` steps.
//!
//! ```no_run
//! # async fn example(client: optidash::Client) -> optidash::Result<()> {
//! use serde_json::json;
//!
//! let mut out = Vec::new();
//! let meta = client
//!     .upload_bytes(std::fs::read("photo.png")?)
//!     .output(json!({ "format": "webp" }))
//!     .copy_to(&mut out)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod errors;
mod models;
mod request;
mod response;

pub use client::{Client, ClientBuilder};
pub use errors::{OptidashError, Result};
pub use models::{ImageResponse, Params, Step};
pub use request::{Request, Source};
pub use response::ImageStream;
pub use tokio_util::sync::CancellationToken;
