//! Typed error codes for the HTTP surface (spec §7).
//!
//! Grounded on `wkmp-ai::error::ApiError`'s `IntoResponse` shape;
//! extended to cover every code spec.md §7 enumerates.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidUrl,
    InvalidSourceType,
    MissingUrl,
    MissingFile,
    InvalidFileType,
    FileTooLarge,
    InvalidFormat,
    InvalidTrack,
    InvalidAction,
    MissingTitle,
    RateLimitExceeded,
    ServiceBusy,
    DurationExceeded,
    JobNotFound,
    JobNotCompleted,
    NoResult,
    NoTracks,
    TrackNotFound,
    MixNotFound,
    ExportNotFound,
    AcquisitionFailed,
    ExtractError,
    SeparationError,
    MergeError,
    ToolTimeout,
    ExternalToolError,
    BadBundle,
    ExportFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::InvalidSourceType => "INVALID_SOURCE_TYPE",
            ErrorCode::MissingUrl => "MISSING_URL",
            ErrorCode::MissingFile => "MISSING_FILE",
            ErrorCode::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::InvalidFormat => "INVALID_FORMAT",
            ErrorCode::InvalidTrack => "INVALID_TRACK",
            ErrorCode::InvalidAction => "INVALID_ACTION",
            ErrorCode::MissingTitle => "MISSING_TITLE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ServiceBusy => "SERVICE_BUSY",
            ErrorCode::DurationExceeded => "DURATION_EXCEEDED",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::JobNotCompleted => "JOB_NOT_COMPLETED",
            ErrorCode::NoResult => "NO_RESULT",
            ErrorCode::NoTracks => "NO_TRACKS",
            ErrorCode::TrackNotFound => "TRACK_NOT_FOUND",
            ErrorCode::MixNotFound => "MIX_NOT_FOUND",
            ErrorCode::ExportNotFound => "EXPORT_NOT_FOUND",
            ErrorCode::AcquisitionFailed => "ACQUISITION_FAILED",
            ErrorCode::ExtractError => "EXTRACT_ERROR",
            ErrorCode::SeparationError => "SEPARATION_ERROR",
            ErrorCode::MergeError => "MERGE_ERROR",
            ErrorCode::ToolTimeout => "TOOL_TIMEOUT",
            ErrorCode::ExternalToolError => "EXTERNAL_TOOL_ERROR",
            ErrorCode::BadBundle => "BAD_BUNDLE",
            ErrorCode::ExportFailed => "EXPORT_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        use ErrorCode::*;
        match self {
            InvalidUrl | InvalidSourceType | MissingUrl | MissingFile | InvalidFileType
            | FileTooLarge | InvalidFormat | InvalidTrack | InvalidAction | MissingTitle
            | DurationExceeded | JobNotCompleted | NoResult | NoTracks | BadBundle => {
                StatusCode::BAD_REQUEST
            }
            RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ServiceBusy => StatusCode::SERVICE_UNAVAILABLE,
            JobNotFound | TrackNotFound | MixNotFound | ExportNotFound => StatusCode::NOT_FOUND,
            AcquisitionFailed | ExtractError | SeparationError | MergeError | ToolTimeout
            | ExternalToolError | ExportFailed | InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// API error type: every error the HTTP surface can emit carries one of
/// the codes enumerated in spec.md §7.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Typed { code: ErrorCode, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("{0}")]
    Common(#[from] stemcut_common::Error),
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::Typed {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Typed { code, .. } => *code,
            ApiError::Io(_) | ApiError::Other(_) | ApiError::Common(_) => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        // Never leak internals (subprocess stderr excepted, which is
        // deliberately surfaced by the pipeline as part of `message`).
        let message = match &self {
            ApiError::Io(_) | ApiError::Other(_) | ApiError::Common(_) => {
                "internal server error, please try again later".to_string()
            }
            ApiError::Typed { message, .. } => message.clone(),
        };

        let body = Json(json!({
            "code": code.as_str(),
            "message": message,
        }));

        (code.status(), body).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
