use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use common::Error;

/// Maps the domain error taxonomy onto HTTP statuses and the wire shape
/// `{code, message, retryable?, retryAfterSec?}`.
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::Config(_) => (StatusCode::BAD_REQUEST, "CONFIG_ERROR"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::CloseInProgress { .. } => (StatusCode::CONFLICT, "CLOSE_IN_PROGRESS"),
            Error::RiskViolation(_) => (StatusCode::CONFLICT, "RISK_VIOLATION"),
            Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            Error::Exchange { .. } | Error::ExchangeUnreachable(_) => {
                (StatusCode::BAD_GATEWAY, "EXCHANGE_ERROR")
            }
            Error::Invariant(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INVARIANT_ERROR"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let mut body = json!({
            "code": code,
            "message": self.0.to_string(),
        });
        if self.0.is_retryable() {
            body["retryable"] = json!(true);
        }
        if let Some(retry_after) = self.0.retry_after() {
            body["retryAfterSec"] = json!(retry_after.as_secs().max(1));
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn taxonomy_maps_to_the_documented_statuses() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Config("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::CloseInProgress {
                    symbol: "BTCUSDT".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                Error::RateLimited {
                    retry_after: Duration::from_secs(2),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                Error::exchange_retryable("down", None),
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Invariant("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let (status, _) = ApiError(error).status_and_code();
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn rate_limited_advertises_the_advised_delay() {
        let err = ApiError(Error::RateLimited {
            retry_after: Duration::from_secs(3),
        });
        assert!(err.0.is_retryable());
        assert_eq!(err.0.retry_after(), Some(Duration::from_secs(3)));
    }
}
