use std::ops::RangeInclusive;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::auth::password::{HashScheme, PasswordPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub idle_timeout_minutes: i64,
    pub hash_scheme: HashScheme,
    pub policy: PasswordPolicy,
    pub username_suffix_limit: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 15,
            hash_scheme: HashScheme::Argon2,
            policy: PasswordPolicy::default(),
            username_suffix_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Serve a canned answer when the model is unavailable.
    pub fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub users_file: String,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub advisor: AdvisorConfig,
    pub oauth: Option<OAuthConfig>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Idle timeout and token lifetime, in minutes: up to 30 days.
const MINUTES_RANGE: RangeInclusive<i64> = 1..=60 * 24 * 30;

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key}={v:?} is not a valid value")),
        None => Ok(default),
    }
}

fn env_minutes(key: &str, default: i64) -> anyhow::Result<i64> {
    let minutes = env_parse(key, default)?;
    anyhow::ensure!(
        MINUTES_RANGE.contains(&minutes),
        "{key} must be between {} and {} minutes, got {minutes}",
        MINUTES_RANGE.start(),
        MINUTES_RANGE.end()
    );
    Ok(minutes)
}

fn env_flag(key: &str, default: bool) -> bool {
    let Some(raw) = env_opt(key) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(key, value = %raw, default, "unrecognised flag value; using default");
            default
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "ideaboard".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "ideaboard-users".into()),
            ttl_minutes: env_minutes("JWT_TTL_MINUTES", 60 * 12)?,
        };

        let defaults = AuthConfig::default();
        let hash_scheme = match env_opt("PASSWORD_SCHEME") {
            Some(v) => v.parse::<HashScheme>()?,
            None => defaults.hash_scheme,
        };
        let preset = match env_opt("PASSWORD_POLICY").as_deref() {
            Some("strict") => PasswordPolicy::strict(),
            _ => defaults.policy.clone(),
        };
        let auth = AuthConfig {
            idle_timeout_minutes: env_minutes(
                "SESSION_IDLE_TIMEOUT_MINUTES",
                defaults.idle_timeout_minutes,
            )?,
            hash_scheme,
            policy: PasswordPolicy {
                min_length: env_parse("PASSWORD_MIN_LENGTH", preset.min_length)?,
                require_mixed_case: env_flag("PASSWORD_REQUIRE_MIXED_CASE", preset.require_mixed_case),
            },
            username_suffix_limit: env_parse("USERNAME_SUFFIX_LIMIT", defaults.username_suffix_limit)?,
        };

        let advisor = AdvisorConfig {
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            gemini_model: env_opt("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".into()),
            fallback: env_flag("ADVISOR_FALLBACK", true),
        };

        let oauth = match (
            env_opt("GOOGLE_CLIENT_ID"),
            env_opt("GOOGLE_CLIENT_SECRET"),
            env_opt("GOOGLE_REDIRECT_URI"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(OAuthConfig {
                client_id,
                client_secret,
                redirect_uri,
            }),
            _ => None,
        };

        Ok(Self {
            users_file: env_opt("USERS_FILE").unwrap_or_else(|| "users.json".into()),
            database_url: env_opt("DATABASE_URL"),
            jwt,
            auth,
            advisor,
            oauth,
        })
    }
}
