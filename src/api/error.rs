//! API错误响应
//! API error responses
//!
//! Errors leave the node as RFC 7807 problem details.

use crate::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};

/// 路由处理器返回的错误
/// Error returned by route handlers
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidSpec(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ReplicationFailed { .. }
            | Error::UnderReplicated { .. }
            | Error::Timeout
            | Error::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            Error::CallbackFailed { .. }
            | Error::Rejected { .. }
            | Error::Http(_)
            | Error::Io(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// RFC 7807 problem details
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: Option<String>,
    title: String,
    status: u16,
    detail: String,
}

impl ProblemDetails {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            problem_type: None,
            title: status.canonical_reason().unwrap_or("Error").to_owned(),
            status: status.as_u16(),
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(error = %self.0, "Request failed");
            } else {
                error!(error = %self.0, "Request failed");
            }
        }
        (status, Json(ProblemDetails::new(status, self.0.to_string()))).into_response()
    }
}
