use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred during conversion.";

// Display text goes to logs only; responses are built by `ApiError`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("media service unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("media service returned unusable data: {0}")]
    UpstreamMalformed(String),

    #[error("media service rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("no usable audio variant: {0}")]
    NoUsableVariant(String),

    #[error("download produced no data: {0}")]
    EmptyOrMissingDownload(String),

    #[error("no working transcoder found")]
    TranscoderNotFound,

    #[error("conversion failed: {reason}")]
    ConversionFailed { reason: String, diagnostics: String },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn internal(context: &str, error: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{context}: {error}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamMalformed(_) => "upstream_malformed",
            Self::UpstreamRejected(_) => "upstream_rejected",
            Self::NoUsableVariant(_) => "no_usable_variant",
            Self::EmptyOrMissingDownload(_) => "empty_or_missing_download",
            Self::TranscoderNotFound => "transcoder_not_found",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::FileNotFound(_) => "file_not_found",
            Self::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::InvalidInput(message) => Self::bad_request(message),
            PipelineError::UpstreamRejected(message) => {
                Self::bad_request(format!("Video service error: {message}"))
            }
            PipelineError::NoUsableVariant(_) => Self::bad_request(
                "No suitable audio formats available for this video. Try another video.",
            ),
            PipelineError::FileNotFound(_) => Self::not_found("File not found"),
            PipelineError::UpstreamUnavailable(_) => Self::internal(
                "Failed to reach the video service. Try another video or check your connection.",
            ),
            PipelineError::UpstreamMalformed(_) => Self::internal(
                "Invalid response from video service. Please try again later.",
            ),
            PipelineError::EmptyOrMissingDownload(_) => {
                Self::internal("Generated audio file is empty")
            }
            PipelineError::TranscoderNotFound => {
                Self::internal("Audio conversion is not available on this server.")
            }
            PipelineError::ConversionFailed { .. } => Self::internal("Audio conversion failed."),
            PipelineError::Internal(_) => Self::internal(UNEXPECTED_ERROR_MESSAGE),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
