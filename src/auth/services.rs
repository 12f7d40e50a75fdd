use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::auth::{
    error::AuthError,
    password::{PasswordPolicy, PasswordScheme},
    repo::{StoreError, UserStore},
    repo_types::UserRecord,
    session::Clock,
};

/// Contains `@`, and the part after the last `@` contains a `.`.
pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^(?s:.*)@[^@]*\.[^@]*$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity asserted by an external provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Reconciles login attempts against the user store.
pub struct IdentityService {
    store: Arc<dyn UserStore>,
    scheme: Arc<dyn PasswordScheme>,
    policy: PasswordPolicy,
    suffix_limit: u32,
    clock: Arc<dyn Clock>,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn UserStore>,
        scheme: Arc<dyn PasswordScheme>,
        policy: PasswordPolicy,
        suffix_limit: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheme,
            policy,
            suffix_limit,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    #[instrument(skip(self, password))]
    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, AuthError> {
        let email = normalize_email(email);

        if self.store.find_by_username(username).await?.is_some() {
            warn!("username already exists");
            return Err(AuthError::UsernameTaken);
        }
        if self.store.find_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::EmailTaken);
        }
        if !is_valid_email(&email) {
            warn!("invalid email");
            return Err(AuthError::InvalidEmailFormat);
        }
        if !self.policy.accepts(password) {
            warn!("password rejected by policy");
            return Err(AuthError::WeakPassword(self.policy.to_string()));
        }

        let hash = self.scheme.hash(password).map_err(|e| {
            error!(error = %e, "hash_password failed");
            AuthError::Internal(e)
        })?;
        let record = UserRecord::local(username, &email, hash, self.clock.now());
        self.store.insert(&record).await?;

        info!(username = %record.username, email = %record.email, "user registered");
        Ok(record)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<UserRecord, AuthError> {
        let Some(user) = self.store.find_by_username(username).await? else {
            warn!("login unknown username");
            return Err(AuthError::UserNotFound);
        };

        let Some(digest) = user.password_hash.as_deref().filter(|h| !h.is_empty()) else {
            warn!("password login against federated-only account");
            return Err(AuthError::InvalidCredential);
        };

        let ok = self.scheme.verify(password, digest).map_err(|e| {
            error!(error = %e, "verify_password failed");
            AuthError::Internal(e)
        })?;
        if !ok {
            warn!("login invalid password");
            return Err(AuthError::InvalidCredential);
        }

        info!(username = %user.username, "user logged in");
        Ok(user)
    }

    /// Finds the account owning the asserted email or mints a federated one.
    #[instrument(skip(self, identity), fields(email = %identity.email))]
    pub async fn resolve_federated(
        &self,
        identity: FederatedIdentity,
    ) -> Result<UserRecord, AuthError> {
        let email = normalize_email(&identity.email);
        if !is_valid_email(&email) {
            warn!("provider returned an unusable email");
            return Err(AuthError::InvalidEmailFormat);
        }

        if let Some(existing) = self.store.find_by_email(&email).await? {
            info!(username = %existing.username, "federated login merged into existing account");
            return Ok(existing);
        }

        let base = username_base(&email);
        let candidates = std::iter::once(base.clone())
            .chain((1..=self.suffix_limit).map(|n| format!("{base}{n}")));

        for candidate in candidates {
            if self.store.find_by_username(&candidate).await?.is_some() {
                continue;
            }
            let record = UserRecord::federated(
                &candidate,
                &email,
                identity.name.clone(),
                identity.picture.clone(),
                self.clock.now(),
            );
            match self.store.insert(&record).await {
                Ok(()) => {
                    info!(username = %record.username, "federated account created");
                    return Ok(record);
                }
                Err(StoreError::UsernameTaken) => continue,
                Err(StoreError::EmailTaken) => {
                    // Someone else created the account for this email meanwhile.
                    return self
                        .store
                        .find_by_email(&email)
                        .await?
                        .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("email vanished after conflict")));
                }
                Err(StoreError::Backend(e)) => return Err(AuthError::Internal(e)),
            }
        }

        warn!(%base, limit = self.suffix_limit, "username suffixes exhausted");
        Err(AuthError::UsernameSpaceExhausted(base))
    }
}

/// Local part of the email, the default username for federated accounts.
fn username_base(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((local, _)) if !local.is_empty() => local.to_string(),
        _ => "user".to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::service_in;
    use super::*;
    use crate::auth::{
        file_store::JsonFileStore, password::Argon2Scheme, repo_types::AuthMethod,
        session::SystemClock,
    };
    use tempfile::TempDir;

    async fn service(dir: &TempDir) -> IdentityService {
        service_in(dir, PasswordPolicy::default(), 1000).await
    }

    fn google(email: &str) -> FederatedIdentity {
        FederatedIdentity {
            email: email.into(),
            name: Some("Someone".into()),
            picture: Some("https://example.com/p.png".into()),
        }
    }

    #[test]
    fn email_needs_dot_after_last_at() {
        assert!(is_valid_email("bob@mail.com"));
        assert!(is_valid_email("a@b@mail.com"));
        assert!(!is_valid_email("bob@localhost"));
        assert!(!is_valid_email("bob.mail.com"));
        assert!(!is_valid_email("a.b@c@localhost"));
    }

    #[test]
    fn username_base_is_local_part() {
        assert_eq!(username_base("alice@x.com"), "alice");
        assert_eq!(username_base("@x.com"), "user");
    }

    #[tokio::test]
    async fn signup_then_login() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("bob", "bob@mail.com", "Secret1").await.unwrap();
        let user = svc.login("bob", "Secret1").await.unwrap();
        assert_eq!(user.username, "bob");
        assert_eq!(user.auth_method, AuthMethod::Local);
    }

    #[tokio::test]
    async fn signup_rejects_taken_username_and_email() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("bob", "bob@mail.com", "Secret1").await.unwrap();

        let err = svc.signup("bob", "other@mail.com", "Secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken));

        let err = svc.signup("robert", "BOB@mail.com ", "Secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn signup_validation_order_is_first_failure_wins() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("bob", "bob@mail.com", "Secret1").await.unwrap();

        // taken username beats a bad email and weak password
        let err = svc.signup("bob", "nope", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::UsernameTaken));
        // bad email beats weak password
        let err = svc.signup("carol", "carol@localhost", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidEmailFormat));
        let err = svc.signup("carol", "carol@mail.com", "12345").await.unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
    }

    #[tokio::test]
    async fn strict_policy_is_pluggable() {
        let dir = TempDir::new().unwrap();
        let svc = service_in(&dir, PasswordPolicy::strict(), 10).await;
        let err = svc.signup("bob", "bob@mail.com", "secret12").await.unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
        svc.signup("bob", "bob@mail.com", "Secret12").await.unwrap();
    }

    #[tokio::test]
    async fn login_failures() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("bob", "bob@mail.com", "Secret1").await.unwrap();

        assert!(matches!(svc.login("nobody", "Secret1").await, Err(AuthError::UserNotFound)));
        assert!(matches!(svc.login("bob", "wrong").await, Err(AuthError::InvalidCredential)));
    }

    #[tokio::test]
    async fn argon2_scheme_signup_and_login() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("users.json")).await.unwrap();
        let svc = IdentityService::new(
            Arc::new(store),
            Arc::new(Argon2Scheme),
            PasswordPolicy::default(),
            10,
            Arc::new(SystemClock),
        );
        svc.signup("bob", "bob@mail.com", "Secret1").await.unwrap();
        svc.login("bob", "Secret1").await.unwrap();
        assert!(matches!(svc.login("bob", "Secret2").await, Err(AuthError::InvalidCredential)));
    }

    #[tokio::test]
    async fn federated_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        let a = svc.resolve_federated(google("dana@x.com")).await.unwrap();
        let b = svc.resolve_federated(google("Dana@X.com")).await.unwrap();
        assert_eq!(a.username, "dana");
        assert_eq!(a.username, b.username);
        assert_eq!(a.auth_method, AuthMethod::Federated);
        assert!(!a.has_password());
        assert_eq!(a.display_name.as_deref(), Some("Someone"));
    }

    #[tokio::test]
    async fn federated_merges_into_local_account() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("bobby", "bob@mail.com", "Secret1").await.unwrap();
        let user = svc.resolve_federated(google("bob@mail.com")).await.unwrap();
        assert_eq!(user.username, "bobby");
        assert_eq!(user.auth_method, AuthMethod::Local);
    }

    #[tokio::test]
    async fn federated_mints_next_free_suffix() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.signup("alice", "alice@other.org", "Secret1").await.unwrap();
        svc.signup("alice1", "alice1@other.org", "Secret1").await.unwrap();

        let user = svc.resolve_federated(google("alice@x.com")).await.unwrap();
        assert_eq!(user.username, "alice2");

        let original = svc.login("alice", "Secret1").await.unwrap();
        assert_eq!(original.email, "alice@other.org");
    }

    #[tokio::test]
    async fn federated_suffix_search_is_bounded() {
        let dir = TempDir::new().unwrap();
        let svc = service_in(&dir, PasswordPolicy::default(), 2).await;
        for name in ["eve", "eve1", "eve2"] {
            svc.signup(name, &format!("{name}@other.org"), "Secret1").await.unwrap();
        }
        let err = svc.resolve_federated(google("eve@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::UsernameSpaceExhausted(ref b) if b == "eve"));
    }

    #[tokio::test]
    async fn racing_signups_on_one_email_admit_one() {
        let dir = TempDir::new().unwrap();
        let svc = Arc::new(service(&dir).await);

        let a = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.signup("ann", "same@x.com", "Secret1").await }
        });
        let b = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.signup("bea", "SAME@x.com", "Secret1").await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AuthError::EmailTaken))));
    }

    #[tokio::test]
    async fn legacy_mixed_case_email_is_one_account() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("users.json"),
            br#"{"bob": {"email": "Bob@Mail.com", "password": "x", "created_at": "2024-05-01T12:00:00"}}"#,
        )
        .unwrap();
        let svc = service(&dir).await;

        let err = svc.signup("robert", "Bob@Mail.com", "Secret1").await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));

        let user = svc.resolve_federated(google("Bob@Mail.com")).await.unwrap();
        assert_eq!(user.username, "bob");
    }

    #[tokio::test]
    async fn federated_account_cannot_password_login() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir).await;
        svc.resolve_federated(google("fay@x.com")).await.unwrap();
        assert!(matches!(svc.login("fay", "").await, Err(AuthError::InvalidCredential)));
    }
}
