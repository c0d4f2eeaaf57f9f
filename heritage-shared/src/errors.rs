use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: Site and image errors
/// - E3xxx: Tag and category errors
/// - E4xxx: User errors
/// - E5xxx: Review errors
/// - E6xxx: Feature flag errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,
    Maintenance,

    // Auth (E1xxx)
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    RefreshTokenRevoked,
    OAuthError,
    PasswordTooWeak,
    AccountInactive,

    // Sites and images (E2xxx)
    SiteNotFound,
    SiteNameTaken,
    ImageNotFound,
    ImageUploadFailed,
    ImageLimitReached,
    InvalidImageOrder,

    // Tags and categories (E3xxx)
    TagNotFound,
    TagNameTaken,
    TagInUse,
    CategoryNotFound,
    CategoryNameTaken,
    CategoryInUse,
    StateNotFound,

    // Users (E4xxx)
    UserNotFound,
    EmailAlreadyExists,
    CannotModifySysAdmin,
    RoleNotFound,

    // Reviews (E5xxx)
    ReviewNotFound,
    DuplicateReview,
    ReviewsDisabled,
    RejectionReasonRequired,

    // Flags (E6xxx)
    FlagNotFound,
    FlagNameTaken,
    MaintenanceMessageRequired,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::Conflict => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",
            Self::Maintenance => "E0010",

            // Auth
            Self::InvalidCredentials => "E1001",
            Self::TokenExpired => "E1002",
            Self::TokenInvalid => "E1003",
            Self::RefreshTokenRevoked => "E1004",
            Self::OAuthError => "E1005",
            Self::PasswordTooWeak => "E1006",
            Self::AccountInactive => "E1007",

            // Sites and images
            Self::SiteNotFound => "E2001",
            Self::SiteNameTaken => "E2002",
            Self::ImageNotFound => "E2003",
            Self::ImageUploadFailed => "E2004",
            Self::ImageLimitReached => "E2005",
            Self::InvalidImageOrder => "E2006",

            // Tags and categories
            Self::TagNotFound => "E3001",
            Self::TagNameTaken => "E3002",
            Self::TagInUse => "E3003",
            Self::CategoryNotFound => "E3004",
            Self::CategoryNameTaken => "E3005",
            Self::CategoryInUse => "E3006",
            Self::StateNotFound => "E3007",

            // Users
            Self::UserNotFound => "E4001",
            Self::EmailAlreadyExists => "E4002",
            Self::CannotModifySysAdmin => "E4003",
            Self::RoleNotFound => "E4004",

            // Reviews
            Self::ReviewNotFound => "E5001",
            Self::DuplicateReview => "E5002",
            Self::ReviewsDisabled => "E5003",
            Self::RejectionReasonRequired => "E5004",

            // Flags
            Self::FlagNotFound => "E6001",
            Self::FlagNameTaken => "E6002",
            Self::MaintenanceMessageRequired => "E6003",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable | Self::Maintenance | Self::ReviewsDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ValidationError | Self::BadRequest | Self::PasswordTooWeak
            | Self::OAuthError | Self::ImageUploadFailed | Self::ImageLimitReached
            | Self::InvalidImageOrder | Self::RejectionReasonRequired
            | Self::MaintenanceMessageRequired => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::SiteNotFound | Self::ImageNotFound | Self::TagNotFound
            | Self::CategoryNotFound | Self::StateNotFound | Self::UserNotFound
            | Self::RoleNotFound | Self::ReviewNotFound | Self::FlagNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid | Self::RefreshTokenRevoked => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::AccountInactive | Self::CannotModifySysAdmin => StatusCode::FORBIDDEN,
            Self::Conflict | Self::SiteNameTaken | Self::TagNameTaken | Self::TagInUse
            | Self::CategoryNameTaken | Self::CategoryInUse | Self::EmailAlreadyExists
            | Self::DuplicateReview | Self::FlagNameTaken => StatusCode::CONFLICT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status this error renders with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Known { code, .. } => code.status_code(),
            AppError::Database(diesel::result::Error::NotFound) => StatusCode::NOT_FOUND,
            AppError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            )) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) | AppError::Database(_) | AppError::Pool(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to a client; internals are never leaked.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Known { message, .. } => message.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Database(diesel::result::Error::NotFound) => "resource not found".into(),
            AppError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            )) => "resource already exists".into(),
            AppError::Internal(_) | AppError::Database(_) | AppError::Pool(_) => {
                "internal server error".into()
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Pool(err) => {
                tracing::error!(error = %err, "database pool error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => (
                        StatusCode::CONFLICT,
                        ApiErrorResponse::new("E0006", "resource already exists"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_codes_map_to_409() {
        for code in [
            ErrorCode::SiteNameTaken,
            ErrorCode::TagInUse,
            ErrorCode::DuplicateReview,
            ErrorCode::EmailAlreadyExists,
        ] {
            assert_eq!(code.status_code(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn maintenance_is_service_unavailable() {
        assert_eq!(ErrorCode::Maintenance.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::Maintenance.code(), "E0010");
    }

    #[test]
    fn diesel_not_found_renders_404() {
        let err = AppError::from(diesel::result::Error::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "resource not found");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::from(anyhow::anyhow!("connection string leaked"));
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
