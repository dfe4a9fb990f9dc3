//! HTTP error mapping utilities

use crate::providers::error::ProviderError;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Map HTTP status code and response body to a ProviderError
pub fn map_http_error(
    status: StatusCode,
    body: Option<String>,
    retry_after: Option<Duration>,
    request_id: Uuid,
) -> ProviderError {
    // Try to parse error details from response body
    let error_details = body
        .as_ref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_details(&v));

    let error_message = error_details
        .as_ref()
        .map(|d| d.message.clone())
        .or_else(|| body.clone().filter(|b| !b.is_empty()))
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    let message_with_id = format!("{} [request_id: {}]", error_message, request_id);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthenticationError,

        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimit {
            retry_after: retry_after.or_else(|| {
                error_details
                    .and_then(|d| d.retry_after_seconds)
                    .map(Duration::from_secs)
            }),
        },

        StatusCode::BAD_REQUEST => ProviderError::InvalidRequest {
            message: message_with_id,
        },

        StatusCode::NOT_FOUND => ProviderError::ModelNotAvailable {
            model: extract_model_from_error(&error_message).unwrap_or_else(|| "unknown".to_string()),
        },

        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,

        status if status.is_server_error() => ProviderError::ServerError {
            status_code: status.as_u16(),
            message: message_with_id,
        },

        status if status.is_client_error() => ProviderError::InvalidRequest {
            message: message_with_id,
        },

        _ => ProviderError::Custom {
            code: format!("HTTP_{}", status.as_u16()),
            message: message_with_id,
        },
    }
}

/// Error details extracted from response body
struct ErrorDetails {
    message: String,
    retry_after_seconds: Option<u64>,
}

/// Extract error details from JSON response
fn extract_error_details(json: &Value) -> Option<ErrorDetails> {
    // OpenAI and Anthropic: { "error": { "message": "...", "type": "..." } }
    // Google: { "error": { "code": 429, "message": "...", "status": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: error.get("retry_after").and_then(|v| v.as_u64()),
            });
        }
        if let Some(message) = error.as_str() {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: None,
            });
        }
    }

    json.get("message").and_then(|v| v.as_str()).map(|message| ErrorDetails {
        message: message.to_string(),
        retry_after_seconds: json.get("retry_after").and_then(|v| v.as_u64()),
    })
}

/// Try to extract model name from error message
fn extract_model_from_error(message: &str) -> Option<String> {
    for quote in ['\'', '"', '`'] {
        let marker = format!("model {}", quote);
        if let Some(start) = message.find(&marker) {
            let start = start + marker.len();
            if let Some(end) = message[start..].find(quote) {
                return Some(message[start..start + end].to_string());
            }
        }
    }
    None
}

/// Parse Retry-After header value
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    // HTTP dates are not handled; vendors send seconds
    header_value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(
            map_http_error(StatusCode::UNAUTHORIZED, None, None, id),
            ProviderError::AuthenticationError
        );
        assert_eq!(
            map_http_error(StatusCode::GATEWAY_TIMEOUT, None, None, id),
            ProviderError::Timeout
        );
        assert!(matches!(
            map_http_error(StatusCode::SERVICE_UNAVAILABLE, Some("down".into()), None, id),
            ProviderError::ServerError { status_code: 503, .. }
        ));
    }

    #[test]
    fn test_rate_limit_prefers_header() {
        let id = Uuid::new_v4();
        let body = r#"{"error": {"message": "slow down", "retry_after": 9}}"#.to_string();
        let err = map_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            Some(body.clone()),
            Some(Duration::from_secs(3)),
            id,
        );
        assert_eq!(err, ProviderError::RateLimit { retry_after: Some(Duration::from_secs(3)) });

        let err = map_http_error(StatusCode::TOO_MANY_REQUESTS, Some(body), None, id);
        assert_eq!(err, ProviderError::RateLimit { retry_after: Some(Duration::from_secs(9)) });
    }

    #[test]
    fn test_model_extraction() {
        let id = Uuid::new_v4();
        let body = r#"{"error": {"message": "The model 'gpt-9' does not exist"}}"#.to_string();
        assert_eq!(
            map_http_error(StatusCode::NOT_FOUND, Some(body), None, id),
            ProviderError::ModelNotAvailable { model: "gpt-9".to_string() }
        );
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
