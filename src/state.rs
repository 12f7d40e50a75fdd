use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::{
    advisor::{
        completion::{CompletionClient, GeminiClient},
        services::Advisor,
    },
    auth::{
        file_store::JsonFileStore,
        oauth::{GoogleOAuth, OAuthExchange, PendingStates},
        repo::{PgUserStore, UserStore},
        services::IdentityService,
        session::{Clock, SessionTracker, SystemClock},
    },
    config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: Arc<IdentityService>,
    pub sessions: Arc<SessionTracker>,
    pub advisor: Arc<Advisor>,
    pub oauth: Option<Arc<dyn OAuthExchange>>,
    pub oauth_states: Arc<PendingStates>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>
            }
            None => Arc::new(JsonFileStore::open(&config.users_file).await?) as Arc<dyn UserStore>,
        };

        let completion: Option<Arc<dyn CompletionClient>> = match &config.advisor.gemini_api_key {
            Some(key) => Some(
                Arc::new(GeminiClient::new(key, &config.advisor.gemini_model)?)
                    as Arc<dyn CompletionClient>,
            ),
            None => None,
        };

        let oauth: Option<Arc<dyn OAuthExchange>> = match &config.oauth {
            Some(cfg) => Some(Arc::new(GoogleOAuth::new(cfg.clone())?) as Arc<dyn OAuthExchange>),
            None => None,
        };

        Ok(Self::from_parts(config, store, Arc::new(SystemClock), completion, oauth))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        completion: Option<Arc<dyn CompletionClient>>,
        oauth: Option<Arc<dyn OAuthExchange>>,
    ) -> Self {
        let auth = &config.auth;
        let identity = Arc::new(IdentityService::new(
            store,
            auth.hash_scheme.build(),
            auth.policy.clone(),
            auth.username_suffix_limit,
            clock.clone(),
        ));
        let sessions = Arc::new(SessionTracker::new(
            time::Duration::minutes(auth.idle_timeout_minutes),
            clock,
        ));
        let advisor = Arc::new(Advisor::new(completion, config.advisor.fallback));

        Self {
            config,
            identity,
            sessions,
            advisor,
            oauth,
            oauth_states: Arc::new(PendingStates::default()),
        }
    }

    #[cfg(test)]
    pub async fn fake(dir: &tempfile::TempDir, clock: Arc<dyn Clock>) -> Self {
        use crate::{
            auth::password::HashScheme,
            config::{AdvisorConfig, AuthConfig, JwtConfig},
        };

        let users_file = dir.path().join("users.json");
        let store = Arc::new(JsonFileStore::open(&users_file).await.expect("open store"));
        let config = Arc::new(AppConfig {
            users_file: users_file.display().to_string(),
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 60,
            },
            auth: AuthConfig {
                hash_scheme: HashScheme::Sha256,
                ..AuthConfig::default()
            },
            advisor: AdvisorConfig {
                gemini_api_key: None,
                gemini_model: "fake".into(),
                fallback: true,
            },
            oauth: None,
        });
        Self::from_parts(config, store, clock, None, None)
    }
}
