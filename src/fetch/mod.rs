//! Loading input files from disk or over HTTP.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use tracing::debug;

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    if !resp.status().is_success() {
        bail!("GET {} returned {}", url, resp.status());
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Loads an input from a local file path or fetches it over HTTP(S).
#[tracing::instrument(fields(source = %source))]
pub async fn fetch_source(source: &str) -> Result<Vec<u8>> {
    let bytes = if source.starts_with("http://") || source.starts_with("https://") {
        let client = BasicClient::new();
        fetch_bytes(&client, source).await?
    } else {
        std::fs::read(source).with_context(|| format!("reading {}", source))?
    };
    debug!(bytes = bytes.len(), "Source loaded");
    Ok(bytes)
}
