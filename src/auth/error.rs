use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::repo::StoreError;

/// Failures of signup, login and federated resolution.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username already exists!")]
    UsernameTaken,
    #[error("Email already registered!")]
    EmailTaken,
    #[error("Invalid email format!")]
    InvalidEmailFormat,
    #[error("{0}")]
    WeakPassword(String),
    #[error("Username not found!")]
    UserNotFound,
    #[error("Invalid password!")]
    InvalidCredential,
    #[error("External sign-in failed: {0}")]
    ExternalAuthFailure(String),
    #[error("No free username derived from {0:?}")]
    UsernameSpaceExhausted(String),
    #[error("{0}")]
    Validation(String),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UsernameTaken => "username_taken",
            Self::EmailTaken => "email_taken",
            Self::InvalidEmailFormat => "invalid_email_format",
            Self::WeakPassword(_) => "weak_password",
            Self::UserNotFound => "user_not_found",
            Self::InvalidCredential => "invalid_credential",
            Self::ExternalAuthFailure(_) => "external_auth_failure",
            Self::UsernameSpaceExhausted(_) => "username_space_exhausted",
            Self::Validation(_) => "validation",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::UsernameTaken | Self::EmailTaken | Self::UsernameSpaceExhausted(_) => {
                StatusCode::CONFLICT
            }
            Self::InvalidEmailFormat | Self::WeakPassword(_) | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::UserNotFound | Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::ExternalAuthFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UsernameTaken => Self::UsernameTaken,
            StoreError::EmailTaken => Self::EmailTaken,
            StoreError::Backend(e) => Self::Internal(e),
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

/// Body of every failed auth response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!(error = ?e, "auth internal failure");
        }
        let body = ErrorBody {
            success: false,
            kind: self.kind(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
