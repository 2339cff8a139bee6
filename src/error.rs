//! Errors answered by the edge itself.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Edge error type with automatic response conversion.
#[derive(Debug)]
pub enum ProxyError {
    /// The forwarded path escapes the backend base path.
    BadTarget,
    /// The inbound request body could not be read.
    BodyRead(String),
    /// The backend could not be reached.
    Upstream(String),
    /// The backend did not answer in time.
    UpstreamTimeout,
    /// Too many requests from one client.
    RateLimited,
    /// Client IP could not be determined for rate limiting.
    UnknownClient,
}

impl ProxyError {
    pub fn from_upstream(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::UpstreamTimeout
        } else {
            ProxyError::Upstream(e.to_string())
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadTarget | ProxyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UnknownClient => StatusCode::FORBIDDEN,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ProxyError::BadTarget => "Invalid target path",
            ProxyError::BodyRead(_) => "Could not read request body",
            ProxyError::Upstream(_) => "Backend unavailable",
            ProxyError::UpstreamTimeout => "Backend timed out",
            ProxyError::RateLimited => "Too many requests. Please try again later.",
            ProxyError::UnknownClient => "Unable to determine client IP.",
        }
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::BodyRead(e) => write!(f, "{}: {}", self.message(), e),
            ProxyError::Upstream(e) => write!(f, "{}: {}", self.message(), e),
            _ => f.write_str(self.message()),
        }
    }
}

impl std::error::Error for ProxyError {}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::Upstream(_) | ProxyError::BodyRead(_) => {
                tracing::warn!(error = %self, "Request not forwarded")
            }
            ProxyError::UpstreamTimeout => tracing::warn!("Backend timed out"),
            _ => {}
        }
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}
