//! Endpoint URL validation
//!
//! Session endpoints must:
//! - Be properly formatted
//! - Use a WebSocket scheme (`ws` or `wss`)
//! - Have a host

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be ws or wss, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Validates a session endpoint URL.
///
/// Plain `ws://` is accepted for local development and logged at warn.
///
/// # Returns
/// * `Ok(Url)` with the parsed endpoint
pub fn validate_ws_endpoint(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url.trim())?;

    match parsed.scheme() {
        "wss" => {}
        "ws" => warn!("Endpoint {} is not encrypted", parsed),
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(parsed)
}
