use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// How an account authenticates. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Local,
    Federated,
}

impl AuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Federated => "federated",
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "federated" => Ok(Self::Federated),
            other => anyhow::bail!("unknown auth method {other:?}"),
        }
    }
}

/// Stored identity entry, keyed by username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>, // absent for federation-only accounts
    pub auth_method: AuthMethod,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    pub fn local(username: &str, email: &str, password_hash: String, now: OffsetDateTime) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: Some(password_hash),
            auth_method: AuthMethod::Local,
            display_name: None,
            avatar_url: None,
            created_at: now,
        }
    }

    pub fn federated(
        username: &str,
        email: &str,
        display_name: Option<String>,
        avatar_url: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: None,
            auth_method: AuthMethod::Federated,
            display_name,
            avatar_url,
            created_at: now,
        }
    }

    /// Whether a local password login is possible for this account.
    pub fn has_password(&self) -> bool {
        self.password_hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub auth_method: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            auth_method: r.auth_method.parse()?,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            display_name: r.display_name,
            avatar_url: r.avatar_url,
            created_at: r.created_at,
        })
    }
}
