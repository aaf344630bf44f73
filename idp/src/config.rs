//! Session and client configuration.
//!
//! Configuration values are provided by the application, not hardcoded.

use chrono::Duration;
use url::Url;

/// Lengths in bytes of the random values drawn per authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomLengths {
    /// Code verifier length.
    ///
    /// Default: 32 bytes
    pub verifier: usize,

    /// State length.
    ///
    /// Default: 16 bytes
    pub state: usize,

    /// Nonce length.
    ///
    /// Default: 16 bytes
    pub nonce: usize,
}

impl RandomLengths {
    /// Create random lengths.
    #[must_use]
    pub const fn new(verifier: usize, state: usize, nonce: usize) -> Self {
        Self {
            verifier,
            state,
            nonce,
        }
    }
}

impl Default for RandomLengths {
    fn default() -> Self {
        Self::new(32, 16, 16)
    }
}

/// Identity provider session configuration.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    /// Random value lengths for verifier, state and nonce.
    pub random_lengths: RandomLengths,

    /// Maximum age of a discovery document, counted from its creation.
    ///
    /// Default: 24 hours
    pub discovery_max_age: Duration,

    /// How long before expiry a token is already treated as expired.
    ///
    /// Default: 0 seconds
    pub refresh_leeway: Duration,

    /// How long an observed token waits before retrying a failed renewal.
    ///
    /// Default: 30 seconds
    pub refresh_retry_interval: Duration,
}

impl IdpConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            random_lengths: RandomLengths::new(32, 16, 16),
            discovery_max_age: Duration::hours(24),
            refresh_leeway: Duration::zero(),
            refresh_retry_interval: Duration::seconds(30),
        }
    }

    /// Set random value lengths.
    #[must_use]
    pub const fn with_random_lengths(mut self, lengths: RandomLengths) -> Self {
        self.random_lengths = lengths;
        self
    }

    /// Set the discovery document maximum age.
    #[must_use]
    pub const fn with_discovery_max_age(mut self, max_age: Duration) -> Self {
        self.discovery_max_age = max_age;
        self
    }

    /// Set the refresh leeway.
    #[must_use]
    pub const fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    /// Set the retry interval after a failed renewal.
    #[must_use]
    pub const fn with_refresh_retry_interval(mut self, interval: Duration) -> Self {
        self.refresh_retry_interval = interval;
        self
    }
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Registered client parameters sent to the identity provider.
///
/// Used by transport implementations when building authorization requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Client id registered with the identity provider.
    pub client_id: String,

    /// Redirect URI of the card and biometric flows.
    pub redirect_uri: Url,

    /// Redirect URI of the federated flow.
    pub ext_auth_redirect_uri: Url,

    /// Requested scopes.
    pub scopes: Vec<String>,
}

impl ClientConfig {
    /// Create a client configuration with the `openid` scope.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uri: Url, ext_auth_redirect_uri: Url) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
            ext_auth_redirect_uri,
            scopes: vec!["openid".to_string()],
        }
    }

    /// Set requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Space separated scope parameter.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}
