use std::collections::HashMap;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::auth::SessionId;
use crate::time::Timestamp;

/// How long a session may sit idle before a sweep removes it.
pub const IDLE_THRESHOLD_SECS: i64 = 30;

/// Minimum gap between two expiry sweeps.
pub const SWEEP_COOLDOWN_SECS: i64 = 60;

/// Lifetime advertised to the browser via the login cookie's `Max-Age`.
pub const SESSION_LIFE_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct Session {
    username: String,
    // set once at creation, deliberately never refreshed on use
    last_activity: Timestamp,
}

#[derive(Debug)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    last_sweep: Timestamp,
}

/// In-memory session store. A single lock covers both the token map and
/// the sweep bookkeeping, so sweeps serialize with ordinary mutations.
pub struct SessionStore {
    inner: Mutex<Inner>,
    idle_threshold: i64,
    sweep_cooldown: i64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_limits(IDLE_THRESHOLD_SECS, SWEEP_COOLDOWN_SECS)
    }

    pub fn with_limits(idle_threshold: i64, sweep_cooldown: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                last_sweep: Timestamp::now().unwrap_or_default(),
            }),
            idle_threshold,
            sweep_cooldown,
        }
    }

    pub async fn create(&self, username: &str) -> Result<SessionId, ()> {
        let now = Timestamp::now()?;
        let id = SessionId::new();

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(
            id,
            Session {
                username: username.into(),
                last_activity: now,
            },
        );

        Ok(id)
    }

    pub async fn username_for(&self, id: &SessionId) -> Option<String> {
        self.inner
            .lock()
            .await
            .sessions
            .get(id)
            .map(|session| session.username.clone())
    }

    /// Idempotent: destroying an absent token is a no-op.
    pub async fn destroy(&self, id: &SessionId) {
        self.inner.lock().await.sessions.remove(id);
    }

    /// Whether enough time has passed since the last sweep that another
    /// one is worth spawning.
    pub async fn sweep_due(&self) -> bool {
        let Ok(now) = Timestamp::now() else {
            return false;
        };

        now.seconds_since(self.inner.lock().await.last_sweep) > self.sweep_cooldown
    }

    /// Remove every session idle longer than the threshold. Triggered
    /// opportunistically from logout rather than on a timer.
    pub async fn sweep_expired(&self) {
        let Ok(now) = Timestamp::now() else {
            return;
        };

        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();

        let threshold = self.idle_threshold;
        inner
            .sessions
            .retain(|_, session| now.seconds_since(session.last_activity) <= threshold);

        let swept = before - inner.sessions.len();
        inner.last_sweep = now;

        if swept > 0 {
            info!("swept {swept} expired sessions, {} live", inner.sessions.len());
        } else {
            debug!("sweep found nothing expired, {} live", inner.sessions.len());
        }
    }

    #[cfg(test)]
    async fn backdate(&self, id: &SessionId, seconds: i64) {
        let mut inner = self.inner.lock().await;
        let session = inner.sessions.get_mut(id).unwrap();
        let backdated = Timestamp::now().unwrap().seconds_since(Timestamp::from_i64(seconds));
        session.last_activity = Timestamp::from_i64(backdated);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}
