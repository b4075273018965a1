use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::users::repo::StoreError;

/// Errors surfaced at the HTTP boundary. Every variant maps to a status
/// code and the uniform error envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Conflict {
        message: String,
        fields: Vec<String>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upload(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Error envelope: `{statusCode, message, errors[]}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub message: String,
    pub errors: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, errors) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message, vec![]),
            ApiError::Conflict { message, fields } => (StatusCode::CONFLICT, message, fields),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, vec![]),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message, vec![]),
            ApiError::Upload(message) => (StatusCode::INTERNAL_SERVER_ERROR, message, vec![]),
            ApiError::Store(StoreError::UniqueViolation(field)) => (
                StatusCode::CONFLICT,
                format!("User with this {field} already exists"),
                vec![field.to_string()],
            ),
            ApiError::Store(StoreError::Database(e)) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                    vec![],
                )
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong".to_string(),
                    vec![],
                )
            }
        };

        let body = ErrorBody {
            status_code: status.as_u16(),
            message,
            errors,
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn variants_map_to_expected_status_codes() {
        assert_eq!(
            status_of(ApiError::Validation("All fields are required".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Conflict {
                message: "already exists".into(),
                fields: vec!["username".into()],
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApiError::Unauthorized("Invalid user credentials".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ApiError::NotFound("User does not exist".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Upload("Failed to upload avatar".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_unique_violation_maps_to_conflict() {
        let err = ApiError::Store(StoreError::UniqueViolation("email"));
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn error_body_serializes_camel_case() {
        let body = ErrorBody {
            status_code: 409,
            message: "duplicate".into(),
            errors: vec!["username".into()],
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"statusCode\":409"));
        assert!(json.contains("\"errors\":[\"username\"]"));
    }
}
