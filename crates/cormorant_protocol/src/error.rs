//! Error taxonomy shared by both transports.
//!
//! Every handler failure is classified as an [`ErrorKind`]; the HTTP
//! facade maps the kind to a status code and the command service maps it
//! to an envelope status string. Handlers never leak stack traces into
//! response bodies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, unknown enum value, out-of-range value, unsafe filter
    InvalidArgument,
    /// Missing or garbled credentials
    Unauthenticated,
    /// Key valid but scope insufficient
    Forbidden,
    /// Project, bucket, table, branch, snapshot, file, session, or key missing
    NotFound,
    /// Duplicate create, revoke-last-admin, idempotency mismatch, PK violation
    Conflict,
    /// Expired workspace or upload session
    Gone,
    /// File exceeds the configured maximum
    PayloadTooLarge,
    /// Workspace connection cap reached
    TooManyRequests,
    /// Unknown command name
    Unimplemented,
    /// Everything else
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Gone => 410,
            Self::PayloadTooLarge => 413,
            Self::TooManyRequests => 429,
            Self::Unimplemented => 501,
            Self::Internal => 500,
        }
    }

    /// Envelope status string (gRPC-style) for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "ALREADY_EXISTS",
            Self::Gone => "FAILED_PRECONDITION",
            Self::PayloadTooLarge => "OUT_OF_RANGE",
            Self::TooManyRequests => "RESOURCE_EXHAUSTED",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
        }
    }
}

/// A classified request failure with a stable machine code.
///
/// `error` is the machine-readable code (`project_not_found`,
/// `idempotency_conflict`, ...); `message` is for humans.
#[derive(Debug, Clone, Error)]
#[error("{error}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_argument(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, error, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, "invalid_credentials", message)
    }

    pub fn forbidden(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, error, message)
    }

    pub fn not_found(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, error, message)
    }

    pub fn conflict(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, error, message)
    }

    pub fn gone(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gone, error, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "internal_error", message)
    }

    /// Body rendered on the wire for this error.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error.clone(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

/// JSON error body: `{error, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
