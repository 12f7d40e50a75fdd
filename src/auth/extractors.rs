use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::{
        error::ErrorBody,
        jwt::{Claims, JwtKeys},
        session::SessionCheck,
    },
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    MissingToken,
    InvalidToken,
    Expired,
    LoggedOut,
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        let (kind, message) = match self {
            Self::MissingToken => ("missing_token", "Missing Authorization header"),
            Self::InvalidToken => ("invalid_token", "Invalid or expired token"),
            Self::Expired => ("session_expired", "Session expired, please log in again"),
            Self::LoggedOut => ("not_logged_in", "Not logged in"),
        };
        let body = ErrorBody {
            success: false,
            kind,
            message: message.into(),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

fn bearer_claims(parts: &Parts, keys: &JwtKeys) -> Result<Option<Claims>, SessionRejection> {
    let Some(auth) = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };

    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .ok_or(SessionRejection::InvalidToken)?;

    match keys.verify(token) {
        Ok(c) => Ok(Some(c)),
        Err(_) => {
            warn!("invalid or expired token");
            Err(SessionRejection::InvalidToken)
        }
    }
}

/// A live session. Extracting it counts as an interaction and refreshes the
/// idle timer.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub sid: Uuid,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = SessionRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let claims = bearer_claims(parts, &keys)?.ok_or(SessionRejection::MissingToken)?;

        match state.sessions.touch(claims.sid).await {
            SessionCheck::Active { username } if username == claims.sub => Ok(AuthSession {
                sid: claims.sid,
                username,
            }),
            SessionCheck::Active { .. } => {
                warn!(sid = %claims.sid, "token subject does not own session");
                Err(SessionRejection::InvalidToken)
            }
            SessionCheck::Expired => Err(SessionRejection::Expired),
            SessionCheck::Anonymous => Err(SessionRejection::LoggedOut),
        }
    }
}

/// Session id from an optional bearer token, without touching the tracker.
/// A bad token reads as no session.
#[derive(Debug, Clone, Copy)]
pub struct MaybeSessionId(pub Option<Uuid>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeSessionId {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let sid = bearer_claims(parts, &keys).ok().flatten().map(|c| c.sid);
        Ok(MaybeSessionId(sid))
    }
}
