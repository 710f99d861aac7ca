//! Mapping of request failures onto HTTP responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use super::dto::ErrorBody;
use crate::admission::{JobError, Rejection};
use crate::provider::UpstreamError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Stopped by admission control
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The provider call failed
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The guarded job died before finishing
    #[error("Processing was interrupted. Please try again.")]
    Aborted,
}

impl From<JobError<UpstreamError>> for ApiError {
    fn from(err: JobError<UpstreamError>) -> Self {
        match err {
            JobError::Rejected(rejection) => ApiError::Rejected(rejection),
            JobError::Failed(upstream) => ApiError::Upstream(upstream),
            JobError::Aborted => ApiError::Aborted,
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Rejected(rejection) => match rejection {
                Rejection::Busy => StatusCode::CONFLICT,
                Rejection::QuotaExhausted { .. } | Rejection::RateLimited { .. } => {
                    StatusCode::TOO_MANY_REQUESTS
                }
                Rejection::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Upstream(upstream) => match upstream {
                UpstreamError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                UpstreamError::NotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
                UpstreamError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UpstreamError::FileNotFound(_) => StatusCode::NOT_FOUND,
                UpstreamError::Api { .. }
                | UpstreamError::Transport(_)
                | UpstreamError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            },
            ApiError::Aborted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable `type` field of the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Rejected(rejection) => rejection.kind(),
            ApiError::Upstream(UpstreamError::RateLimited { .. }) => "rate_limit",
            ApiError::Upstream(UpstreamError::NotConfigured { .. }) => "not_configured",
            ApiError::Upstream(UpstreamError::UnsupportedFileType(_)) => "unsupported_file",
            ApiError::Upstream(UpstreamError::FileNotFound(_)) => "not_found",
            ApiError::Upstream(_) => "upstream",
            ApiError::Aborted => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Upstream(UpstreamError::RateLimited { .. }) => {
                "The AI provider is currently rate limiting requests. Please try again in a few \
minutes, or switch to the other provider."
                    .to_string()
            }
            other => other.to_string(),
        }
    }

    fn log(&self) {
        match self {
            ApiError::Upstream(err) => tracing::warn!(error = %err, "Provider call failed"),
            ApiError::Aborted => tracing::error!("Guarded job aborted"),
            _ => tracing::debug!(error = %self, "Request failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();

        let mut body = ErrorBody {
            message: self.message(),
            kind: self.kind(),
            retry_after: None,
            max: None,
            used: None,
        };
        match &self {
            ApiError::Rejected(Rejection::RateLimited { retry_after_secs }) => {
                body.retry_after = Some(*retry_after_secs);
            }
            ApiError::Rejected(Rejection::QuotaExhausted { max, used }) => {
                body.max = Some(*max);
                body.used = Some(*used);
            }
            _ => {}
        }

        let mut response = (self.status_code(), Json(body)).into_response();
        if let ApiError::Rejected(Rejection::RateLimited { retry_after_secs }) = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Provider;

    #[test]
    fn test_rejection_statuses() {
        assert_eq!(
            ApiError::from(Rejection::Busy).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(Rejection::QuotaExhausted { max: 20, used: 20 }).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(Rejection::Unavailable).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rate_limit_sets_retry_after_header() {
        let response = ApiError::from(Rejection::RateLimited { retry_after_secs: 42 }).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_upstream_throttling_is_rate_limit_shaped() {
        let err = ApiError::from(JobError::Failed(UpstreamError::RateLimited {
            provider: Provider::OpenRouter,
            message: "rate-limited".to_string(),
        }));

        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.kind(), "rate_limit");
    }

    #[test]
    fn test_aborted_job_is_internal_error() {
        let err = ApiError::from(JobError::<UpstreamError>::Aborted);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
