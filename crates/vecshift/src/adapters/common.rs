//! Helpers shared across adapters.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default HTTP timeout for REST-backed adapters.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout shared by all adapters.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Creates a configured HTTP client with timeouts.
#[must_use]
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Validates an endpoint URL scheme before connecting.
pub fn validate_url(url: &str, allowed_schemes: &[&str]) -> Result<()> {
    let has_valid_scheme = allowed_schemes
        .iter()
        .any(|s| url.starts_with(&format!("{s}://")));

    if !has_valid_scheme {
        return Err(Error::Config(format!(
            "invalid URL scheme in '{}', allowed: {}",
            url,
            allowed_schemes.join(", ")
        )));
    }
    if !url.contains("://") || url.split("://").nth(1).is_none_or(str::is_empty) {
        return Err(Error::Config(format!("invalid URL format: {url}")));
    }
    Ok(())
}

/// Parses a vector from a JSON value (an array of numbers).
pub fn parse_vector_from_json(value: &Value, field_name: &str) -> Result<Vec<f32>> {
    match value {
        Value::Array(arr) => arr
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| Error::Read("vector element is not a number".to_string()))
            })
            .collect(),
        _ => Err(Error::Read(format!(
            "vector field '{field_name}' is not an array"
        ))),
    }
}
