//! Quick-start examples for the Optidash Rust SDK.
//!
//! Run with:
//!   OPTIDASH_API_KEY=... RUST_LOG=optidash=debug cargo run --example quickstart
//!
//! Or pass the key directly in code (not recommended for production).

use optidash::{ClientBuilder, Step};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> optidash::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // -----------------------------------------------------------------------
    // 1. Create a client (reads OPTIDASH_API_KEY from environment)
    // -----------------------------------------------------------------------
    let client = ClientBuilder::new().build()?;

    // Or provide the key directly:
    // let client = optidash::Client::new("your-api-key")?;

    // -----------------------------------------------------------------------
    // 2. Upload a local file and get JSON metadata back
    // -----------------------------------------------------------------------
    let meta = client
        .upload("demo.jpg")
        .optimize(json!({ "compression": "medium" }))
        .resize(json!({ "width": 1280, "height": 720, "mode": "fit" }))
        .to_json()
        .await?;

    println!("Hosted at: {}", meta["output"]["url"]);
    println!();

    // -----------------------------------------------------------------------
    // 3. Let the API fetch a remote image and save the result locally
    // -----------------------------------------------------------------------
    let meta = client
        .fetch("https://example.com/sample.jpg")
        .step(Step::Stylize, json!({ "style": "grayscale" }))
        .output(json!({ "format": "webp" }))
        .to_file("sample.webp", 0o644)
        .await?;

    if let Some(meta) = meta {
        println!("Saved sample.webp ({} bytes)", meta["output"]["size"]);
    }
    println!();

    // -----------------------------------------------------------------------
    // 4. Stream the processed image and consume it incrementally
    // -----------------------------------------------------------------------
    let response = client
        .upload_bytes(std::fs::read("demo.jpg")?)
        .scale(json!({ "width": 25 }))
        .to_stream()
        .await?;

    let mut stream = response.stream;
    let mut total = 0;
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    println!("Streamed {total} bytes");

    Ok(())
}
