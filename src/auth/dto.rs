use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::{
    repo_types::{AuthMethod, UserRecord},
    session::SessionSnapshot,
};

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for the OAuth redirect target.
#[derive(Debug, Deserialize)]
pub struct OAuthCallbackRequest {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeUrlResponse {
    pub url: String,
}

/// Plain outcome for the presentation layer.
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Response returned after a login of either kind.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub session: SessionSnapshot,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub username: String,
    pub email: String,
    pub auth_method: AuthMethod,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<UserRecord> for PublicUser {
    fn from(u: UserRecord) -> Self {
        Self {
            username: u.username,
            email: u.email,
            auth_method: u.auth_method,
            display_name: u.display_name,
            avatar_url: u.avatar_url,
            created_at: u.created_at,
        }
    }
}
