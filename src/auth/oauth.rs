use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{auth::services::FederatedIdentity, config::OAuthConfig};

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Max age of an authorize `state` value.
const STATE_TTL: Duration = Duration::minutes(10);

/// Third-party code exchange.
#[async_trait]
pub trait OAuthExchange: Send + Sync {
    fn authorize_url(&self, state: &str) -> anyhow::Result<String>;
    async fn exchange_code(&self, code: &str) -> anyhow::Result<FederatedIdentity>;
}

pub struct GoogleOAuth {
    client: reqwest::Client,
    config: OAuthConfig,
}

impl GoogleOAuth {
    pub fn new(config: OAuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("build oauth http client")?;
        Ok(Self { client, config })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

#[async_trait]
impl OAuthExchange for GoogleOAuth {
    fn authorize_url(&self, state: &str) -> anyhow::Result<String> {
        let url = Url::parse_with_params(
            GOOGLE_AUTHORIZE_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )?;
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<FederatedIdentity> {
        let resp = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("token request")?;
        if !resp.status().is_success() {
            anyhow::bail!("token endpoint returned HTTP {}", resp.status());
        }
        let token: TokenResponse = resp.json().await.context("decode token response")?;

        let resp = self
            .client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .context("userinfo request")?;
        if !resp.status().is_success() {
            anyhow::bail!("userinfo endpoint returned HTTP {}", resp.status());
        }
        let info: UserInfo = resp.json().await.context("decode userinfo")?;
        debug!(has_email = info.email.is_some(), "userinfo received");
        identity_from(info)
    }
}

fn identity_from(info: UserInfo) -> anyhow::Result<FederatedIdentity> {
    if info.email_verified == Some(false) {
        anyhow::bail!("provider email is not verified");
    }
    let email = info.email.context("provider did not return an email")?;
    Ok(FederatedIdentity {
        email,
        name: info.name,
        picture: info.picture,
    })
}

/// Outstanding `state` values handed out with authorize URLs.
#[derive(Default)]
pub struct PendingStates {
    issued: Mutex<HashMap<String, OffsetDateTime>>,
}

impl PendingStates {
    pub async fn issue(&self) -> String {
        let now = OffsetDateTime::now_utc();
        let state = Uuid::new_v4().simple().to_string();
        let mut issued = self.issued.lock().await;
        issued.retain(|_, at| now - *at < STATE_TTL);
        issued.insert(state.clone(), now);
        state
    }

    /// Single use: a state is forgotten once consumed.
    pub async fn consume(&self, state: &str) -> bool {
        let Some(at) = self.issued.lock().await.remove(state) else {
            warn!("unknown oauth state");
            return false;
        };
        OffsetDateTime::now_utc() - at < STATE_TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google() -> GoogleOAuth {
        GoogleOAuth::new(OAuthConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8080/callback".into(),
        })
        .unwrap()
    }

    #[test]
    fn authorize_url_carries_client_and_state() {
        let url = google().authorize_url("abc123").unwrap();
        assert!(url.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("state=abc123"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcallback"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn userinfo_without_email_is_rejected() {
        let info = UserInfo {
            email: None,
            email_verified: None,
            name: Some("X".into()),
            picture: None,
        };
        assert!(identity_from(info).is_err());
    }

    #[test]
    fn unverified_email_is_rejected() {
        let info = UserInfo {
            email: Some("a@b.com".into()),
            email_verified: Some(false),
            name: None,
            picture: None,
        };
        assert!(identity_from(info).is_err());
    }

    #[test]
    fn userinfo_maps_to_identity() {
        let info: UserInfo = serde_json::from_str(
            r#"{"email":"a@b.com","email_verified":true,"name":"A","picture":"https://p"}"#,
        )
        .unwrap();
        let id = identity_from(info).unwrap();
        assert_eq!(id.email, "a@b.com");
        assert_eq!(id.name.as_deref(), Some("A"));
        assert_eq!(id.picture.as_deref(), Some("https://p"));
    }

    #[tokio::test]
    async fn states_are_single_use() {
        let pending = PendingStates::default();
        let s = pending.issue().await;
        assert!(pending.consume(&s).await);
        assert!(!pending.consume(&s).await);
        assert!(!pending.consume("forged").await);
    }
}
