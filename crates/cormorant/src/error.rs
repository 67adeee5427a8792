//! Transport-boundary error mapping.
//!
//! Core errors are classified once here; response bodies carry
//! `{error, message, details?}` and never a stack trace. Full detail goes
//! to the structured logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cormorant_catalog::CatalogError;
use cormorant_db::BackendError;
use cormorant_protocol::{ApiError, ErrorKind};
use cormorant_storage::StorageError;
use tracing::error;

/// Handler result type for the HTTP facade.
pub type HttpResult<T> = Result<T, AppError>;

/// Newtype carrying a classified [`ApiError`] through axum.
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let api = match &err {
            StorageError::NotFound(msg) => ApiError::not_found("not_found", msg.clone()),
            StorageError::Conflict(msg) => ApiError::conflict("conflict", msg.clone()),
            StorageError::InvalidArgument(msg) => {
                ApiError::invalid_argument("invalid_argument", msg.clone())
            }
            StorageError::Io(_) | StorageError::Backend(_) | StorageError::Catalog(_) => {
                error!(error = %err, "storage operation failed");
                ApiError::internal(err.to_string())
            }
        };
        Self(api)
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let api = match &err {
            CatalogError::NotFound(msg) => ApiError::not_found("not_found", msg.clone()),
            CatalogError::Conflict(msg) => ApiError::conflict("conflict", msg.clone()),
            _ => {
                error!(error = %err, "catalog operation failed");
                ApiError::internal(err.to_string())
            }
        };
        Self(api)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        error!(error = %err, "engine operation failed");
        Self(ApiError::internal(err.to_string()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.kind == ErrorKind::Internal {
            error!(error = %self.0, "request failed with internal error");
        }
        (status, Json(self.0.to_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        let err: AppError = StorageError::not_found("Table users not found").into();
        assert_eq!(err.0.kind, ErrorKind::NotFound);

        let err: AppError = StorageError::conflict("Table users already exists").into();
        assert_eq!(err.0.kind, ErrorKind::Conflict);

        let err: AppError = StorageError::invalid_argument("bad limit").into();
        assert_eq!(err.0.kind, ErrorKind::InvalidArgument);

        let err: AppError =
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert_eq!(err.0.kind, ErrorKind::Internal);
    }

    #[test]
    fn test_catalog_error_classification() {
        let err: AppError = CatalogError::conflict("duplicate").into();
        assert_eq!(err.0.kind, ErrorKind::Conflict);
        let err: AppError = CatalogError::not_found("missing").into();
        assert_eq!(err.0.kind, ErrorKind::NotFound);
    }
}
