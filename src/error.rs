//! Error hierarchy and HTTP response conversion.
//!
//! Only the error kinds the spec calls "propagated" (malformed client
//! input, reply timeout, resolver sub-fetch failure) produce a structured
//! HTTP failure body. Transport failures, validator rejections, and
//! unmatched replies are logged-only elsewhere and never reach here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(ThisError, Debug)]
pub enum GatewayError {
    /// A request body or query was missing a required field or had the wrong type.
    #[error("{message}")]
    BadRequest { message: String, code: &'static str },

    /// No reply arrived before the request's deadline.
    #[error("request timed out waiting for a reply")]
    Timeout,

    /// The broker reported a non-zero, non-400/404 status for the outer request.
    #[error("upstream service error (status {upstream_status})")]
    UpstreamError { upstream_status: i64 },

    /// The broker reported 404 for the outer request.
    #[error("not found")]
    NotFound,

    /// A resolver sub-fetch failed while enriching a reply.
    #[error("failed to resolve a nested entity: {message}")]
    ResolutionFailed { message: String },

    /// Startup-time failure: broker connection, exchange/queue assertion, etc.
    #[error("startup failed: {0}")]
    Startup(#[from] anyhow::Error),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    code: &'static str,
}

impl GatewayError {
    /// Maps this error onto the status-to-HTTP mapping in §6.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::UpstreamError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ResolutionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Startup(_) | GatewayError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest { code, .. } => code,
            GatewayError::Timeout => "SERVICE_TIMEOUT",
            GatewayError::NotFound => "NOT_FOUND",
            GatewayError::UpstreamError { .. } => "INTERNAL_ERROR",
            GatewayError::ResolutionFailed { .. } => "INTERNAL_ERROR",
            GatewayError::Startup(_) | GatewayError::Config(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Timeout => tracing::info!("request timed out"),
            GatewayError::BadRequest { message, .. } => {
                tracing::debug!(message, "rejecting malformed client input")
            }
            GatewayError::UpstreamError { upstream_status } => {
                tracing::warn!(upstream_status, "upstream reported a failure status")
            }
            GatewayError::ResolutionFailed { message } => {
                tracing::warn!(message, "resolver sub-fetch failed")
            }
            GatewayError::NotFound => tracing::debug!("not found"),
            GatewayError::Startup(err) => tracing::error!(%err, "startup error"),
            GatewayError::Config(err) => tracing::error!(%err, "configuration error"),
        }

        let status = self.status_code();
        let code = self.code();
        let body = ErrorBody {
            status: "FAIL",
            error: ErrorDetail {
                message: self.to_string(),
                code,
            },
        };

        (status, Json(body)).into_response()
    }
}
