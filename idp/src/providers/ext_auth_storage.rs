//! Storage of pending federated authentication requests.

use crate::environment::{Clock, SystemClock};
use crate::models::ExtAuthChallengeSession;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Pending federated authentications keyed by state.
///
/// Owned by the application so a pending request survives the session
/// object while the user is in the sectoral identity provider's app.
pub trait ExtAuthRequestStorage: Send + Sync {
    /// Store `session` under `state`, or remove the entry when `None`.
    fn set(&self, session: Option<ExtAuthChallengeSession>, state: &str);

    /// Pending session for `state`.
    fn get(&self, state: &str) -> Option<ExtAuthChallengeSession>;
}

/// A federated authentication waiting for its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExtAuth {
    /// Verifier, nonce and chosen app of the attempt.
    pub session: ExtAuthChallengeSession,

    /// When the attempt was started.
    pub started_at: DateTime<Utc>,
}

/// In-memory request storage.
///
/// Attempts older than the time to live are evicted on every access, so
/// abandoned logins do not accumulate.
pub struct MemoryExtAuthRequestStorage {
    requests: watch::Sender<HashMap<String, PendingExtAuth>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl MemoryExtAuthRequestStorage {
    /// Default time to live of a pending request.
    ///
    /// Longer than the identity provider's challenge lifetime, after which
    /// the callback would be refused anyway.
    pub const DEFAULT_TTL: Duration = Duration::minutes(5);

    /// Create empty storage on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create empty storage reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: watch::Sender::new(HashMap::new()),
            clock,
            ttl: Self::DEFAULT_TTL,
        }
    }

    /// Set the time to live of pending requests.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Observe the set of pending requests.
    #[must_use]
    pub fn pending_requests(&self) -> watch::Receiver<HashMap<String, PendingExtAuth>> {
        self.requests.subscribe()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.evict_expired();
        self.requests.borrow().len()
    }

    /// Whether no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self) {
        let cutoff = self.clock.now() - self.ttl;
        self.requests.send_if_modified(|requests| {
            let before = requests.len();
            requests.retain(|_, pending| pending.started_at > cutoff);
            let evicted = before - requests.len();
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted abandoned federated authentications");
            }
            evicted > 0
        });
    }
}

impl Default for MemoryExtAuthRequestStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryExtAuthRequestStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryExtAuthRequestStorage")
            .field("pending", &self.requests.borrow().len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ExtAuthRequestStorage for MemoryExtAuthRequestStorage {
    fn set(&self, session: Option<ExtAuthChallengeSession>, state: &str) {
        self.evict_expired();
        let started_at = self.clock.now();
        self.requests.send_modify(|requests| match session {
            Some(session) => {
                requests.insert(state.to_string(), PendingExtAuth { session, started_at });
            }
            None => {
                requests.remove(state);
            }
        });
    }

    fn get(&self, state: &str) -> Option<ExtAuthChallengeSession> {
        self.evict_expired();
        self.requests
            .borrow()
            .get(state)
            .map(|pending| pending.session.clone())
    }
}
