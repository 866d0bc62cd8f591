use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("link setup failed: {0}")]
    LinkSetup(String),

    #[error("video stream read failed: {0}")]
    StreamRead(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("control write failed: {0}")]
    ControlWrite(String),

    #[error("control read failed: {0}")]
    ControlRead(String),

    #[error("invalid signaling payload: {0}")]
    SignalingInvalid(String),

    #[error("device not connected: {0}")]
    DeviceNotFound(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body returned by the signaling surface
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::SignalingInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };

        tracing::error!(
            status = %status,
            error_message = %body.error,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;
