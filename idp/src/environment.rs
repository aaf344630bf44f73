//! Session environment.
//!
//! This module defines the environment type for dependency injection
//! into an [`IdpSession`](crate::session::IdpSession).

use crate::crypto::backend::Curves;
use crate::crypto::random::{OsRandom, RandomSource};
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Session environment.
///
/// Contains all external collaborators of a session. Storage, trust store
/// and the ext-auth request store are shared with the application, which
/// keeps ownership of their lifetime.
///
/// # Type Parameters
///
/// - `T`: Transport client
/// - `TS`: Trust store
/// - `S`: Token and discovery document storage
/// - `E`: Ext-auth request storage
pub struct IdpEnvironment<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Transport client.
    pub transport: Arc<T>,

    /// Trust store validating identity provider certificates.
    pub trust_store: Arc<TS>,

    /// Storage of the current token and discovery document.
    pub storage: Arc<S>,

    /// Storage of pending federated authentication requests.
    pub ext_auth_requests: Arc<E>,

    /// Time source.
    pub clock: Arc<dyn Clock>,

    /// Random source for verifier, state, nonce and keys.
    pub random: Arc<dyn RandomSource>,

    /// Curve backends for signature checks and key agreement.
    pub curves: Curves,
}

impl<T, TS, S, E> IdpEnvironment<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Create an environment using the system clock, OS randomness and the
    /// built-in P-256 backend.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        trust_store: Arc<TS>,
        storage: Arc<S>,
        ext_auth_requests: Arc<E>,
    ) -> Self {
        Self {
            transport,
            trust_store,
            storage,
            ext_auth_requests,
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            curves: Curves::default(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Replace the curve backends, e.g. to add brainpoolP256r1.
    #[must_use]
    pub fn with_curves(mut self, curves: Curves) -> Self {
        self.curves = curves;
        self
    }
}

impl<T, TS, S, E> Clone for IdpEnvironment<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            trust_store: Arc::clone(&self.trust_store),
            storage: Arc::clone(&self.storage),
            ext_auth_requests: Arc::clone(&self.ext_auth_requests),
            clock: Arc::clone(&self.clock),
            random: Arc::clone(&self.random),
            curves: self.curves.clone(),
        }
    }
}
