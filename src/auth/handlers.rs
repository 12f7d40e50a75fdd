use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthorizeUrlResponse, LoginRequest, LoginResponse, OAuthCallbackRequest, Outcome,
            PublicUser, SignupRequest,
        },
        error::AuthError,
        extractors::{AuthSession, MaybeSessionId},
        jwt::JwtKeys,
        repo_types::UserRecord,
        session::SessionSnapshot,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/oauth/authorize", get(oauth_authorize))
        .route("/auth/oauth/callback", post(oauth_callback))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/me", get(get_me))
}

fn require_filled(fields: &[&str]) -> Result<(), AuthError> {
    if fields.iter().any(|f| f.trim().is_empty()) {
        return Err(AuthError::Validation("Please fill in all fields!".into()));
    }
    Ok(())
}

/// Installs a session for `user` and issues its bearer token.
async fn open_session(
    state: &AppState,
    user: UserRecord,
    message: &str,
) -> Result<Json<LoginResponse>, AuthError> {
    let sid = state.sessions.start(&user.username).await;
    let keys = JwtKeys::from_ref(state);
    let token = match keys.sign(&user.username, sid) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "jwt sign failed");
            state.sessions.end(sid).await;
            return Err(AuthError::Internal(e));
        }
    };
    let session = state.sessions.peek(sid).await;
    Ok(Json(LoginResponse {
        success: true,
        message: message.to_string(),
        token,
        session,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<Outcome>, AuthError> {
    let username = payload.username.trim();
    let confirm = payload.confirm_password.as_deref().unwrap_or(&payload.password);
    require_filled(&[username, payload.email.as_str(), payload.password.as_str(), confirm])?;
    if payload.password != confirm {
        warn!("password confirmation mismatch");
        return Err(AuthError::Validation("Passwords do not match!".into()));
    }

    state
        .identity
        .signup(username, &payload.email, &payload.password)
        .await?;
    Ok(Json(Outcome::ok("Account created successfully!")))
}

#[instrument(skip(state, payload), fields(username = %payload.username))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let username = payload.username.trim();
    require_filled(&[username, payload.password.as_str()])?;

    let user = state.identity.login(username, &payload.password).await?;
    open_session(&state, user, "Login successful!").await
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    MaybeSessionId(sid): MaybeSessionId,
) -> Json<Outcome> {
    if let Some(sid) = sid {
        if state.sessions.end(sid).await {
            info!(%sid, "user logged out");
        }
    }
    Json(Outcome::ok("Logged out"))
}

#[instrument(skip(state))]
pub async fn oauth_authorize(
    State(state): State<AppState>,
) -> Result<Json<AuthorizeUrlResponse>, AuthError> {
    let Some(provider) = &state.oauth else {
        return Err(AuthError::ExternalAuthFailure("OAuth sign-in is not configured".into()));
    };
    let csrf = state.oauth_states.issue().await;
    let url = provider.authorize_url(&csrf)?;
    Ok(Json(AuthorizeUrlResponse { url }))
}

#[instrument(skip(state, payload))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Json(payload): Json<OAuthCallbackRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let Some(provider) = &state.oauth else {
        return Err(AuthError::ExternalAuthFailure("OAuth sign-in is not configured".into()));
    };
    if !state.oauth_states.consume(&payload.state).await {
        return Err(AuthError::ExternalAuthFailure("sign-in request expired or forged".into()));
    }

    let identity = provider.exchange_code(&payload.code).await.map_err(|e| {
        warn!(error = %e, "oauth code exchange failed");
        AuthError::ExternalAuthFailure("could not verify the provider response".into())
    })?;

    let user = state.identity.resolve_federated(identity).await?;
    open_session(&state, user, "Login successful!").await
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    MaybeSessionId(sid): MaybeSessionId,
) -> Json<SessionSnapshot> {
    let snapshot = match sid {
        Some(sid) => state.sessions.peek(sid).await,
        None => SessionSnapshot::anonymous(),
    };
    Json(snapshot)
}

#[instrument(skip(state, session), fields(username = %session.username))]
pub async fn get_me(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .identity
        .store()
        .find_by_username(&session.username)
        .await?
        .ok_or_else(|| {
            error!("session user missing from store");
            AuthError::UserNotFound
        })?;
    Ok(Json(PublicUser::from(user)))
}
