//! Identity provider session.
//!
//! [`IdpSession`] orchestrates the protocol against an injected
//! [`IdpEnvironment`]. It owns no persistent state itself: the token and the
//! discovery document live in the environment's storage, pending federated
//! requests in the ext-auth request storage. The session is the only writer
//! of both.
//!
//! # Flows
//!
//! ```text
//! card / biometric                      federated
//! ────────────────                      ─────────
//! request_challenge()                   load_directory_kk_apps()
//!   └─ ChallengeSession                 start_ext_auth(entry) ──▶ URL
//! sign (caller's signer)                  ... user in the insurer app ...
//! verify() / alt_verify()               ext_auth_verify_and_exchange(callback)
//!   └─ ExchangeToken                      └─ Token
//! exchange()
//!   └─ Token ──▶ storage ◀── refresh() via SSO token
//! ```
//!
//! Every operation resolves the discovery document first through
//! [`IdpSession::current_document`].
//!
//! # Cancellation
//!
//! Tokens are written only after an operation's last await point, and the
//! discovery document only once it has been fully validated. Dropping an
//! in-flight future never leaves either half updated.

mod challenge;
mod discovery;
mod ext_auth;
mod pairing;
mod token;

pub use discovery::DiscoveryState;

use crate::config::{ClientConfig, IdpConfig};
use crate::crypto::CryptoBox;
use crate::environment::IdpEnvironment;
use crate::error::Result;
use crate::models::Token;
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicU64;
use tokio::sync::{Mutex, watch};

/// Authentication session against one identity provider.
///
/// Share it behind an `Arc`; all operations take `&self`.
///
/// # Type Parameters
///
/// - `T`: Transport client
/// - `TS`: Trust store
/// - `S`: Token and discovery document storage
/// - `E`: Ext-auth request storage
pub struct IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    config: IdpConfig,
    client: ClientConfig,
    env: IdpEnvironment<T, TS, S, E>,
    crypto: CryptoBox,
    discovery_lock: Mutex<()>,
    discovery_state: watch::Sender<DiscoveryState>,
    refresh_lock: Mutex<Option<Result<Token>>>,
    refresh_generation: AtomicU64,
}

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Create a session.
    ///
    /// No I/O happens here, so a cached discovery document is not checked
    /// yet and [`IdpSession::discovery_state`] reports
    /// [`DiscoveryState::Loading`] for it. Await [`IdpSession::connect`]
    /// right after construction to reconcile it against the clock and the
    /// trust store. Every operation reconciles on its own as well, so
    /// skipping `connect` only delays eviction of a stale document and its
    /// token until the first call.
    #[must_use]
    pub fn new(config: IdpConfig, client: ClientConfig, env: IdpEnvironment<T, TS, S, E>) -> Self {
        let crypto =
            CryptoBox::new(env.random.clone(), config.random_lengths).with_curves(env.curves.clone());
        let initial = if env.storage.discovery_document().is_some() {
            DiscoveryState::Loading
        } else {
            DiscoveryState::Absent
        };
        Self {
            config,
            client,
            env,
            crypto,
            discovery_lock: Mutex::new(()),
            discovery_state: watch::Sender::new(initial),
            refresh_lock: Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Reconcile the cached discovery document. The second step of setting
    /// up a session.
    ///
    /// Failures are logged, not returned; the next operation retries.
    pub async fn connect(&self) {
        if let Err(error) = self.current_document(false).await {
            tracing::warn!(error = %error, "Discovery document unavailable at startup");
        }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &IdpConfig {
        &self.config
    }

    /// Registered client parameters.
    #[must_use]
    pub const fn client(&self) -> &ClientConfig {
        &self.client
    }

    /// Injected collaborators.
    #[must_use]
    pub const fn environment(&self) -> &IdpEnvironment<T, TS, S, E> {
        &self.env
    }

    fn now(&self) -> DateTime<Utc> {
        self.env.clock.now()
    }
}

impl<T, TS, S, E> std::fmt::Debug for IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpSession")
            .field("client_id", &self.client.client_id)
            .field("discovery_state", &*self.discovery_state.borrow())
            .finish_non_exhaustive()
    }
}
