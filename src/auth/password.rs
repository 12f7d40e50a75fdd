use std::{fmt, str::FromStr, sync::Arc};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::error;

/// One-way transform from a plaintext password to a storable digest.
pub trait PasswordScheme: Send + Sync {
    fn hash(&self, plain: &str) -> anyhow::Result<String>;
    fn verify(&self, plain: &str, digest: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScheme {
    Argon2,
    Sha256,
}

impl FromStr for HashScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "argon2" => Ok(Self::Argon2),
            "sha256" => Ok(Self::Sha256),
            other => anyhow::bail!("unknown password scheme {other:?}"),
        }
    }
}

impl HashScheme {
    pub fn build(self) -> Arc<dyn PasswordScheme> {
        match self {
            Self::Argon2 => Arc::new(Argon2Scheme),
            Self::Sha256 => Arc::new(Sha256Scheme),
        }
    }
}

/// Salted Argon2 with default params, stored as a PHC string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Scheme;

impl PasswordScheme for Argon2Scheme {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    fn verify(&self, plain: &str, digest: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(digest).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }
}

/// Unsalted hex SHA-256. Deterministic; kept for stores written by older
/// deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Scheme;

impl PasswordScheme for Sha256Scheme {
    fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(plain.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn verify(&self, plain: &str, digest: &str) -> anyhow::Result<bool> {
        Ok(self.hash(plain)? == digest)
    }
}

/// Acceptability rule for new passwords.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_mixed_case: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 6,
            require_mixed_case: false,
        }
    }
}

impl PasswordPolicy {
    pub fn strict() -> Self {
        Self {
            min_length: 8,
            require_mixed_case: true,
        }
    }

    pub fn accepts(&self, password: &str) -> bool {
        if password.chars().count() < self.min_length {
            return false;
        }
        if self.require_mixed_case {
            let upper = password.chars().any(char::is_uppercase);
            let lower = password.chars().any(char::is_lowercase);
            return upper && lower;
        }
        true
    }
}

impl fmt::Display for PasswordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password must be at least {} characters long", self.min_length)?;
        if self.require_mixed_case {
            f.write_str(" and contain upper and lower case letters")?;
        }
        f.write_str("!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = Argon2Scheme.hash(password).expect("hashing should succeed");
        assert!(Argon2Scheme.verify(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn argon2_verify_rejects_wrong_password() {
        let hash = Argon2Scheme
            .hash("correct-horse-battery-staple")
            .expect("hashing should succeed");
        assert!(!Argon2Scheme
            .verify("wrong-password", &hash)
            .expect("verify should not error"));
    }

    #[test]
    fn argon2_verify_errors_on_malformed_hash() {
        let err = Argon2Scheme.verify("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn argon2_salts_each_hash() {
        let a = Argon2Scheme.hash("same").unwrap();
        let b = Argon2Scheme.hash("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_is_deterministic() {
        let a = Sha256Scheme.hash("Secret1").unwrap();
        let b = Sha256Scheme.hash("Secret1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(Sha256Scheme.verify("Secret1", &a).unwrap());
        assert!(!Sha256Scheme.verify("Secret2", &a).unwrap());
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            Sha256Scheme.hash("password").unwrap(),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn scheme_parses_from_config_strings() {
        assert_eq!("Argon2".parse::<HashScheme>().unwrap(), HashScheme::Argon2);
        assert_eq!(" sha256 ".parse::<HashScheme>().unwrap(), HashScheme::Sha256);
        assert!("md5".parse::<HashScheme>().is_err());
    }

    #[test]
    fn default_policy_is_length_only() {
        let p = PasswordPolicy::default();
        assert!(p.accepts("abcdef"));
        assert!(!p.accepts("abcde"));
    }

    #[test]
    fn strict_policy_needs_mixed_case() {
        let p = PasswordPolicy::strict();
        assert!(!p.accepts("Short1"));
        assert!(!p.accepts("alllowercase"));
        assert!(!p.accepts("ALLUPPERCASE"));
        assert!(p.accepts("MixedCase"));
    }

    #[test]
    fn policy_message_mentions_length() {
        let msg = PasswordPolicy::default().to_string();
        assert_eq!(msg, "Password must be at least 6 characters long!");
        assert!(PasswordPolicy::strict().to_string().contains("upper and lower"));
    }
}
