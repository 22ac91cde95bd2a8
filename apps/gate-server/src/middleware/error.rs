//! Error handling - RFC 7807 compliant responses.

use std::fmt;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use bulwark_core::GuardError;
use bulwark_core::domain::{ErrorClass, Rejection};
use bulwark_shared::ErrorResponse;

/// Application-level error type that converts to RFC 7807 responses.
#[derive(Debug)]
pub enum AppError {
    /// A gate check said no.
    Rejected(Rejection),
    /// The store failed on a fail-closed path.
    Unavailable(String),
    BadRequest(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Rejected(rejection) => write!(f, "Rejected: {}", rejection),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
        }
    }
}

impl AppError {
    /// Retry guidance; fatal rejections carry none.
    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            AppError::Rejected(rejection) => match rejection.reason.class() {
                ErrorClass::FatalToRequest => None,
                ErrorClass::SoftRetryable | ErrorClass::HardRetryableLater => {
                    rejection.retry_after_seconds()
                }
            },
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Rejected(rejection) => match rejection.reason.class() {
                ErrorClass::SoftRetryable | ErrorClass::HardRetryableLater => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                ErrorClass::FatalToRequest => StatusCode::FORBIDDEN,
            },
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let retry_after = self.retry_after_seconds();
        let error = match self {
            AppError::Rejected(rejection) => {
                let base = match self.status_code() {
                    StatusCode::FORBIDDEN => ErrorResponse::forbidden(),
                    _ => ErrorResponse::too_many_requests(),
                };
                base.with_code(rejection.reason.as_str())
                    .with_detail(rejection.detail.clone())
                    .with_retry_after(retry_after)
            }
            AppError::Unavailable(detail) => {
                tracing::error!("Gate unavailable: {}", detail);
                ErrorResponse::service_unavailable("Guard store unavailable")
            }
            AppError::BadRequest(detail) => ErrorResponse::bad_request(detail),
        };

        let mut response = HttpResponse::build(self.status_code());
        if let Some(secs) = retry_after {
            response.insert_header(("Retry-After", secs.to_string()));
        }
        response.json(error)
    }
}

// Conversion from gate errors
impl From<GuardError> for AppError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Rejected(rejection) => AppError::Rejected(rejection),
            GuardError::Store(e) => AppError::Unavailable(e.to_string()),
            GuardError::Settings(e) => AppError::Unavailable(e.to_string()),
        }
    }
}

/// Result type alias for handlers.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core::StoreError;
    use bulwark_core::domain::ReasonCode;
    use std::time::Duration;

    #[test]
    fn test_status_follows_error_class() {
        let limited = AppError::Rejected(
            Rejection::new(ReasonCode::RateLimited, "slow down")
                .with_retry_after(Duration::from_millis(1500)),
        );
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.retry_after_seconds(), Some(2));

        let banned = AppError::Rejected(
            Rejection::new(ReasonCode::Banned, "banned").with_retry_after(Duration::from_secs(60)),
        );
        assert_eq!(banned.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(banned.retry_after_seconds(), None);

        let outage = AppError::from(GuardError::Store(StoreError::Connection("down".into())));
        assert_eq!(outage.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
