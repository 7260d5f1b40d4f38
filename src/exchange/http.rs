//! HTTP plumbing shared by the REST adapters.

use super::error::ExchangeError;
use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const ERROR_BODY_LIMIT: usize = 512;

/// HTTP client with the per-request deadline applied.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Read a response body as JSON, turning non-2xx statuses into API errors.
pub async fn read_json(exchange: &str, response: Response) -> Result<Value, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let mut snippet = body;
        if snippet.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !snippet.is_char_boundary(cut) {
                cut -= 1;
            }
            snippet.truncate(cut);
        }
        return Err(ExchangeError::api(exchange, format!("HTTP {}: {}", status, snippet)));
    }

    serde_json::from_str(&body).map_err(|e| ExchangeError::parse(exchange, e.to_string()))
}

/// Deserialize an already-checked JSON payload.
pub fn decode<T: DeserializeOwned>(exchange: &str, value: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(value).map_err(|e| ExchangeError::parse(exchange, e.to_string()))
}

/// Identifier sent either as a JSON string or a JSON number.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_string(&json!(12345)), Some("12345".to_string()));
        assert_eq!(id_string(&json!("")), None);
        assert_eq!(id_string(&json!(null)), None);
    }
}
