use std::collections::HashMap;

use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Result of checking a session on an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Active { username: String },
    Expired,
    Anonymous,
}

/// Per-user session state. `Session::default()` is the anonymous session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    is_logged_in: bool,
    username: Option<String>,
    last_activity_at: Option<OffsetDateTime>,
}

impl Session {
    pub fn authenticated(username: &str, now: OffsetDateTime) -> Self {
        Self {
            is_logged_in: true,
            username: Some(username.to_string()),
            last_activity_at: Some(now),
        }
    }

    fn idle_expired(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        match self.last_activity_at {
            Some(at) => now - at > timeout,
            None => true,
        }
    }

    /// Tracked interaction: refresh when within the timeout, otherwise reset
    /// to anonymous and report expiry.
    pub fn touch(&mut self, now: OffsetDateTime, timeout: Duration) -> SessionCheck {
        if !self.is_logged_in {
            return SessionCheck::Anonymous;
        }
        if self.idle_expired(now, timeout) {
            self.logout();
            return SessionCheck::Expired;
        }
        self.last_activity_at = Some(now);
        SessionCheck::Active {
            username: self.username.clone().unwrap_or_default(),
        }
    }

    pub fn logout(&mut self) {
        *self = Self::default();
    }

    pub fn remaining(&self, now: OffsetDateTime, timeout: Duration) -> Duration {
        match self.last_activity_at {
            Some(at) if self.is_logged_in => (timeout - (now - at)).max(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    pub fn snapshot(&self, now: OffsetDateTime, timeout: Duration) -> SessionSnapshot {
        SessionSnapshot {
            is_logged_in: self.is_logged_in,
            username: self.username.clone(),
            remaining_seconds: self.remaining(now, timeout).whole_seconds(),
        }
    }
}

/// What the presentation layer gets to see of a session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_logged_in: bool,
    pub username: Option<String>,
    pub remaining_seconds: i64,
}

impl SessionSnapshot {
    pub fn anonymous() -> Self {
        Session::default().snapshot(OffsetDateTime::UNIX_EPOCH, Duration::ZERO)
    }
}

/// Live sessions keyed by an opaque id handed to the client.
///
/// Expiry is evaluated lazily when a session is looked at, and every new
/// session sweeps out the idle ones. There is no background task.
pub struct SessionTracker {
    timeout: Duration,
    clock: std::sync::Arc<dyn Clock>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionTracker {
    pub fn new(timeout: Duration, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            timeout,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, username: &str) -> Uuid {
        let now = self.clock.now();
        let sid = Uuid::new_v4();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.idle_expired(now, self.timeout));
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, "idle sessions dropped");
        }
        sessions.insert(sid, Session::authenticated(username, now));
        info!(%sid, username, "session started");
        sid
    }

    /// Tracked interaction on `sid`.
    pub async fn touch(&self, sid: Uuid) -> SessionCheck {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&sid) else {
            return SessionCheck::Anonymous;
        };
        let check = session.touch(now, self.timeout);
        if check == SessionCheck::Expired {
            sessions.remove(&sid);
            info!(%sid, "session expired");
        }
        check
    }

    /// Snapshot without refreshing activity; a stale session is still torn
    /// down.
    pub async fn peek(&self, sid: Uuid) -> SessionSnapshot {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&sid) {
            Some(s) if s.idle_expired(now, self.timeout) => {
                sessions.remove(&sid);
                info!(%sid, "session expired");
                SessionSnapshot::anonymous()
            }
            Some(s) => s.snapshot(now, self.timeout),
            None => SessionSnapshot::anonymous(),
        }
    }

    pub async fn end(&self, sid: Uuid) -> bool {
        let removed = self.sessions.lock().await.remove(&sid).is_some();
        debug!(%sid, removed, "session ended");
        removed
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Clock that only moves when told to.
    pub struct ManualClock(std::sync::Mutex<OffsetDateTime>);

    impl ManualClock {
        pub fn new(start: OffsetDateTime) -> Self {
            Self(std::sync::Mutex::new(start))
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }
}
