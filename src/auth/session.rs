//! auth::session
//!
//! In-memory browser sessions and their authorization state.
//!
//! # State Machine
//!
//! ```text
//! Unauthorized --begin--> Pending { state, return_to, authorize_url }
//! Pending --begin--> Pending (new state)
//! Pending --unauthorized request--> Pending (same state)
//! Pending --callback (state matches)--> Authorized { token, user }
//! Pending --callback (state differs / denied)--> Unauthorized
//! Authorized --refresh ok--> Authorized
//! Authorized --refresh rejected / expired--> Unauthorized
//! any --logout--> (session removed)
//! ```
//!
//! Sessions are identified by a random id carried in the `sdlc_session`
//! cookie and evicted after a period of inactivity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::MutexGuard;
use uuid::Uuid;

use super::token::GitLabToken;
use crate::core::model::User;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sdlc_session";

/// Authorization progress of one session.
#[derive(Debug, Clone)]
pub enum AuthorizationState {
    /// No authorization has been started, or it was lost.
    Unauthorized,
    /// The browser was sent to GitLab; waiting for the callback.
    Pending {
        /// Fingerprint of the one-time `state` nonce.
        state_hash: String,
        /// Where to send the browser once authorized.
        return_to: Option<String>,
        /// The GitLab URL carrying the nonce, handed out again until the
        /// callback arrives.
        authorize_url: String,
    },
    /// The session holds a token for `user`.
    Authorized { token: GitLabToken, user: User },
}

impl AuthorizationState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, AuthorizationState::Authorized { .. })
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            AuthorizationState::Authorized { user, .. } => Some(user),
            _ => None,
        }
    }
}

/// One browser session.
#[derive(Debug)]
pub struct Session {
    id: String,
    last_seen: Mutex<Instant>,
    state: tokio::sync::Mutex<AuthorizationState>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            last_seen: Mutex::new(Instant::now()),
            state: tokio::sync::Mutex::new(AuthorizationState::Unauthorized),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the authorization state.
    ///
    /// Token refresh happens while this lock is held, so concurrent requests
    /// of one session wait for a single refresh.
    pub async fn state(&self) -> MutexGuard<'_, AuthorizationState> {
        self.state.lock().await
    }

    fn touch(&self) {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        *last_seen = Instant::now();
    }

    fn idle(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

/// All live sessions.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store evicting sessions idle for longer than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a new, unauthorized session.
    pub fn create(&self) -> Arc<Session> {
        self.evict_expired();
        let session = Arc::new(Session::new());
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), Arc::clone(&session));
        session
    }

    /// Look up a live session and mark it as used.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()?;
        if session.idle() >= self.ttl {
            self.remove(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn remove(&self, id: &str) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Drop idle sessions, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, session| session.idle() < self.ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
