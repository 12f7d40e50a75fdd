use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use crate::auth::{
    repo::{StoreError, UserStore},
    repo_types::{AuthMethod, UserRecord},
    services::normalize_email,
};

/// On-disk shape of one entry in the users file, keyed by username.
#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    email: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
    #[serde(with = "created_at")]
    created_at: OffsetDateTime,
}

impl StoredUser {
    fn into_record(self, username: String) -> UserRecord {
        UserRecord {
            username,
            email: normalize_email(&self.email),
            password_hash: self.password.filter(|p| !p.is_empty()),
            auth_method: self.auth_method,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            created_at: self.created_at,
        }
    }

    fn from_record(r: &UserRecord) -> Self {
        Self {
            email: r.email.clone(),
            password: r.password_hash.clone(),
            auth_method: r.auth_method,
            display_name: r.display_name.clone(),
            avatar_url: r.avatar_url.clone(),
            created_at: r.created_at,
        }
    }
}

/// RFC 3339 on write; on read also accepts offset-less ISO 8601 stamps,
/// taken as UTC.
mod created_at {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use time::{
        format_description::well_known::{Iso8601, Rfc3339},
        OffsetDateTime, PrimitiveDateTime,
    };

    pub fn serialize<S: Serializer>(v: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::serialize(v, s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        if let Ok(v) = OffsetDateTime::parse(&raw, &Rfc3339) {
            return Ok(v);
        }
        PrimitiveDateTime::parse(&raw, &Iso8601::DEFAULT)
            .map(PrimitiveDateTime::assume_utc)
            .map_err(|e| D::Error::custom(format!("bad created_at {raw:?}: {e}")))
    }
}

/// User store backed by a single JSON mapping file.
///
/// The whole mapping is loaded on open and rewritten on every insert through
/// a temp file plus rename. Memory is updated only once the write is durable.
pub struct JsonFileStore {
    path: PathBuf,
    users: Mutex<HashMap<String, UserRecord>>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let users = load(&path).await?;
        info!(path = %path.display(), users = users.len(), "user store loaded");
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    async fn persist(&self, users: &HashMap<String, UserRecord>) -> anyhow::Result<()> {
        let sorted: BTreeMap<&str, StoredUser> = users
            .iter()
            .map(|(k, v)| (k.as_str(), StoredUser::from_record(v)))
            .collect();
        let body = serde_json::to_vec_pretty(&sorted).context("serialize users")?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }

        let tmp = tmp_path(&self.path);
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(&body).await.context("write users")?;
        f.sync_all().await.context("sync users")?;
        drop(f);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename {} -> {}", tmp.display(), self.path.display()))?;
        debug!(path = %self.path.display(), users = users.len(), "user store saved");
        Ok(())
    }
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn find_by_username(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.users.lock().await.get(username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        let email = normalize_email(email);
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.lock().await;
        if users.contains_key(&record.username) {
            return Err(StoreError::UsernameTaken);
        }
        let email = normalize_email(&record.email);
        if users.values().any(|u| u.email == email) {
            return Err(StoreError::EmailTaken);
        }

        let mut next = users.clone();
        next.insert(
            record.username.clone(),
            UserRecord {
                email,
                ..record.clone()
            },
        );
        self.persist(&next).await?;
        *users = next;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A missing file is an empty store and a corrupt one is moved aside. Any
/// other read failure refuses to open, so the next write cannot replace a
/// file that was never read.
async fn load(path: &Path) -> anyhow::Result<HashMap<String, UserRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("read users file {}", path.display()));
        }
    };

    let users = match serde_json::from_slice::<HashMap<String, StoredUser>>(&bytes) {
        Ok(raw) => raw
            .into_iter()
            .map(|(name, u)| (name.clone(), u.into_record(name)))
            .collect::<HashMap<_, _>>(),
        Err(e) => {
            let aside = corrupt_path(path);
            warn!(
                error = %e,
                path = %path.display(),
                moved_to = %aside.display(),
                "users file corrupt; starting empty"
            );
            if let Err(e) = tokio::fs::rename(path, &aside).await {
                warn!(error = %e, "could not move corrupt users file aside");
            }
            HashMap::new()
        }
    };

    let mut emails: Vec<&str> = users.values().map(|u| u.email.as_str()).collect();
    emails.sort_unstable();
    emails.dedup();
    if emails.len() != users.len() {
        warn!(
            path = %path.display(),
            "users file has accounts whose emails differ only by case"
        );
    }
    Ok(users)
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", OffsetDateTime::now_utc().unix_timestamp()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn bob() -> UserRecord {
        UserRecord::local("bob", "bob@mail.com", "digest".into(), OffsetDateTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("users.json")).await.unwrap();
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("users.json");
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store.insert(&bob()).await.unwrap();
        }
        let store = JsonFileStore::open(&path).await.unwrap();
        let got = store.find_by_email("bob@mail.com").await.unwrap().unwrap();
        assert_eq!(got, bob());
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn insert_rejects_username_before_email() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("users.json")).await.unwrap();
        store.insert(&bob()).await.unwrap();

        let err = store.insert(&bob()).await.unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken));

        let mut other = bob();
        other.username = "robert".into();
        let err = store.insert(&other).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
        assert!(store.find_by_username("robert").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_and_is_kept_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.find_by_username("bob").await.unwrap().is_none());

        let kept = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("users.json.corrupt-"));
        assert!(kept);
    }

    #[tokio::test]
    async fn reads_files_written_by_reference_app() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            br#"{
              "alice": {
                "email": "alice@x.com",
                "password": "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8",
                "created_at": "2024-05-01T12:34:56.123456"
              }
            }"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let alice = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(alice.email, "alice@x.com");
        assert_eq!(alice.auth_method, AuthMethod::Local);
        assert!(alice.has_password());
        assert_eq!(alice.created_at.year(), 2024);
    }

    #[tokio::test]
    async fn legacy_mixed_case_email_still_blocks_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            br#"{"bob": {"email": "Bob@Mail.com", "password": "x", "created_at": "2024-05-01T12:00:00"}}"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let bob = store.find_by_email("bob@mail.com").await.unwrap().unwrap();
        assert_eq!(bob.username, "bob");
        assert_eq!(bob.email, "bob@mail.com");
        assert_eq!(
            store.find_by_email(" BOB@mail.COM").await.unwrap().unwrap().username,
            "bob"
        );

        let robert = UserRecord::local("robert", "Bob@Mail.com", "d".into(), OffsetDateTime::UNIX_EPOCH);
        assert!(matches!(store.insert(&robert).await, Err(StoreError::EmailTaken)));
    }

    #[tokio::test]
    async fn insert_stores_normalized_email() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        let rec = UserRecord::local("ann", " Ann@X.com", "d".into(), OffsetDateTime::UNIX_EPOCH);
        store.insert(&rec).await.unwrap();
        let ann = store.find_by_username("ann").await.unwrap().unwrap();
        assert_eq!(ann.email, "ann@x.com");
    }

    #[tokio::test]
    async fn unreadable_file_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be read as a file.
        let path = dir.path().join("users.json");
        std::fs::create_dir(&path).unwrap();

        assert!(JsonFileStore::open(&path).await.is_err());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn failed_write_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        // A directory where the file should be makes the final rename fail.
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"x").unwrap();

        let err = store.insert(&bob()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_username_admit_one() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("users.json")).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let rec = UserRecord::local(
                    "same",
                    &format!("u{i}@x.com"),
                    "d".into(),
                    OffsetDateTime::UNIX_EPOCH,
                );
                store.insert(&rec).await.is_ok()
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_same_email_admit_one() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("users.json")).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let rec = UserRecord::local(
                    &format!("user{i}"),
                    if i % 2 == 0 { "same@x.com" } else { "SAME@x.com" },
                    "d".into(),
                    OffsetDateTime::UNIX_EPOCH,
                );
                match store.insert(&rec).await {
                    Ok(()) => true,
                    Err(StoreError::EmailTaken) => false,
                    Err(e) => panic!("unexpected {e}"),
                }
            }));
        }
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert!(store.find_by_email("same@x.com").await.unwrap().is_some());
    }
}
