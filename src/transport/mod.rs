//! Remote alert transport.
//!
//! The HTTP document-store sink is compiled only with the `sink-http`
//! feature. Endpoint parsing is always available so configuration can be
//! checked without the network stack.

#[cfg(feature = "sink-http")]
mod http;

#[cfg(feature = "sink-http")]
pub use http::HttpAlertSink;

use anyhow::{anyhow, Context, Result};
use url::Url;

/// Parse a collection URL. Only `http://` and `https://` with a host are
/// accepted, without credentials, query or fragment; the bearer token travels
/// in a header, never in the URL. A trailing slash is dropped.
pub fn validate_endpoint(endpoint: &str) -> Result<Url> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).with_context(|| format!("invalid endpoint {}", endpoint))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!("endpoint must use http:// or https://: {}", endpoint));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("endpoint has no host: {}", endpoint));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(anyhow!("endpoint must not embed credentials"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(anyhow!("endpoint must not carry a query or fragment"));
    }
    Ok(url)
}
