//! Error types for coinfetch.
//!
//! [`FetchError`] is the taxonomy every work item classifies its external
//! calls into; it decides whether the retry loop backs off or gives up.
//! [`CoinfetchError`] covers everything outside the item boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoinfetchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of a single external call (market-data API or data store).
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429. The only retryable variant.
    #[error("rate limited{}", retry_hint(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// HTTP 404. Terminal, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 409, e.g. a PostgREST unique violation (23505). Terminal.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other status, transport or decode failure. Terminal.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, retry_after_ms: Option<u64>, body: String) -> Self {
        match status {
            reqwest::StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after_ms },
            reqwest::StatusCode::NOT_FOUND => FetchError::NotFound(body),
            reqwest::StatusCode::CONFLICT => FetchError::Conflict(body),
            _ => FetchError::Other(format!("status {}: {body}", status.as_u16())),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}

fn retry_hint(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(" (retry after {ms}ms)"),
        None => String::new(),
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::from_status(status, None, err.to_string()),
            None => FetchError::Other(err.to_string()),
        }
    }
}

/// Read a `Retry-After` header given in seconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

/// Turn a PostgREST/CoinGecko response into a `FetchError` unless it succeeded.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after_ms(response.headers());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(FetchError::from_status(status, retry_after, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn classifies_statuses() {
        assert!(FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, None, String::new()).is_rate_limited());
        assert!(matches!(
            FetchError::from_status(StatusCode::NOT_FOUND, None, "gone".into()),
            FetchError::NotFound(_)
        ));
        let other = FetchError::from_status(StatusCode::BAD_GATEWAY, None, "upstream".into());
        assert_eq!(other.to_string(), "status 502: upstream");
    }

    #[test]
    fn rate_limit_message_shows_hint_only_when_known() {
        assert_eq!(FetchError::RateLimited { retry_after_ms: None }.to_string(), "rate limited");
        assert_eq!(
            FetchError::RateLimited { retry_after_ms: Some(2000) }.to_string(),
            "rate limited (retry after 2000ms)"
        );
    }

    #[test]
    fn unique_violation_is_conflict() {
        let err = FetchError::from_status(StatusCode::CONFLICT, None, r#"{"code":"23505"}"#.into());
        assert!(matches!(err, FetchError::Conflict(_)));
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_ms(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after_ms(&headers), Some(3000));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_ms(&headers), None);
    }

    #[test]
    fn wraps_into_crate_error() {
        let err: CoinfetchError = FetchError::NotFound("bitcoin".into()).into();
        assert_eq!(err.to_string(), "Fetch error: not found: bitcoin");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FetchError>();
        assert_send_sync::<CoinfetchError>();
    }
}
