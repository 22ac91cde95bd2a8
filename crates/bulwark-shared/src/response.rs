//! Error response body (RFC 7807).

use serde::{Deserialize, Serialize};

/// RFC 7807 Problem Details for HTTP APIs, extended with the gate's
/// machine-readable reason code.
///
/// See: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub error_type: String,

    /// A short, human-readable summary of the problem type.
    pub title: String,

    /// The HTTP status code.
    pub status: u16,

    /// A human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Reason code, e.g. `rate_limited` or `challenge_invalid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Whole seconds the client should wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorResponse {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            error_type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
            code: None,
            retry_after_seconds: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the reason code; the problem type becomes `urn:bulwark:<code>`.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.error_type = format!("urn:bulwark:{code}");
        self.code = Some(code);
        self
    }

    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after_seconds = seconds;
        self
    }

    // Common error constructors
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(400, "Bad Request").with_detail(detail)
    }

    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    pub fn too_many_requests() -> Self {
        Self::new(429, "Too Many Requests")
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(503, "Service Unavailable").with_detail(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body_shape() {
        let body = ErrorResponse::too_many_requests()
            .with_code("rate_limited")
            .with_retry_after(Some(12));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["type"], "urn:bulwark:rate_limited");
        assert_eq!(json["status"], 429);
        assert_eq!(json["code"], "rate_limited");
        assert_eq!(json["retry_after_seconds"], 12);
        assert!(json.get("detail").is_none());
    }
}
