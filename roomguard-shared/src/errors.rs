use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors (E0003, E0005, E0006, E0008 retired)
/// - E1xxx: Session errors
/// - E2xxx: Send gate denials
/// - E3xxx: Admin control errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    Unauthorized,
    ServiceUnavailable,
    StoreFailure,

    // Session (E1xxx)
    TokenExpired,
    TokenInvalid,
    SessionRevoked,

    // Send gate (E2xxx)
    UserBanned,
    UserMuted,
    RoomLocked,
    SlowModeActive,
    EmptyMessage,

    // Admin (E3xxx)
    AccessDenied,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::Unauthorized => "E0004",
            Self::ServiceUnavailable => "E0007",
            Self::StoreFailure => "E0009",

            // Session
            Self::TokenExpired => "E1001",
            Self::TokenInvalid => "E1002",
            Self::SessionRevoked => "E1003",

            // Send gate
            Self::UserBanned => "E2001",
            Self::UserMuted => "E2002",
            Self::RoomLocked => "E2003",
            Self::SlowModeActive => "E2004",
            Self::EmptyMessage => "E2005",

            // Admin
            Self::AccessDenied => "E3001",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError | Self::StoreFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid
            | Self::SessionRevoked => StatusCode::UNAUTHORIZED,
            Self::AccessDenied | Self::UserBanned | Self::UserMuted | Self::RoomLocked => StatusCode::FORBIDDEN,
            Self::SlowModeActive => StatusCode::TOO_MANY_REQUESTS,
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

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The code carried by a known error, `None` for internal errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Known { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                if status.is_server_error() {
                    tracing::error!(code = code.code(), "{message}");
                }
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
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
