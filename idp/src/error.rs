//! Error types for identity provider sessions.
//!
//! Every failure the session can report is one of a closed set of kinds.
//! Kinds carry their own structured data instead of wrapping foreign error
//! types, so errors stay `Clone + PartialEq` and can be compared in tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for identity provider operations.
pub type Result<T> = std::result::Result<T, IdpError>;

/// Comprehensive error taxonomy for the identity provider engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdpError {
    // ═══════════════════════════════════════════════════════════
    // Transport
    // ═══════════════════════════════════════════════════════════

    /// The transport client failed to reach the identity provider.
    #[error("Network error: {0}")]
    Network(#[from] HttpError),

    /// The identity provider answered with a structured error.
    #[error("Server error: {0}")]
    ServerError(ServerResponse),

    // ═══════════════════════════════════════════════════════════
    // Validation & Trust
    // ═══════════════════════════════════════════════════════════

    /// Signature or claims verification failed.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The discovery document is expired, not yet valid or untrusted.
    #[error("Invalid discovery document")]
    InvalidDiscoveryDocument,

    /// The trust store could not establish trust in a certificate.
    #[error("Trust store error: {0}")]
    TrustStore(#[from] TrustStoreError),

    /// A required certificate was missing from a key set or header.
    #[error("No certificate found")]
    NoCertificateFound,

    /// A signed document failed signature verification.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    // ═══════════════════════════════════════════════════════════
    // Protocol Integrity
    // ═══════════════════════════════════════════════════════════

    /// The state returned by the identity provider differs from the one sent.
    #[error("Invalid state parameter")]
    InvalidStateParameter,

    /// The ID token nonce differs from the one sent.
    #[error("Invalid nonce")]
    InvalidNonce,

    /// No stored external authentication request matches the callback state.
    #[error("Original external authentication request missing")]
    ExtAuthOriginalRequestMissing,

    /// An operation requires a token but none is stored.
    #[error("Token unavailable")]
    TokenUnavailable,

    // ═══════════════════════════════════════════════════════════
    // Payload Handling
    // ═══════════════════════════════════════════════════════════

    /// A payload could not be decoded.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// A payload could not be interpreted and no further detail is available.
    #[error("Unspecified error")]
    Unspecified,

    /// Unknown algorithm or unsupported feature.
    #[error("Unsupported: {}", .0.as_deref().unwrap_or("unknown"))]
    Unsupported(Option<String>),

    /// Building an encrypted envelope failed.
    #[error("Encryption failed")]
    Encryption,

    /// Opening an encrypted envelope failed.
    #[error("Decryption failed")]
    Decryption,

    // ═══════════════════════════════════════════════════════════
    // Pairing & Biometrics
    // ═══════════════════════════════════════════════════════════

    /// Device pairing failed.
    #[error("Pairing failed: {0}")]
    Pairing(String),

    /// The biometric key could not be used.
    #[error("Biometrics error: {0}")]
    Biometrics(String),

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Internal invariant violation at a known call site.
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),

    /// The session runs against the demo transport.
    #[error("Not available in demo mode")]
    NotAvailableInDemoMode,
}

impl IdpError {
    /// Returns `true` if the error originates from the transport layer.
    ///
    /// # Examples
    ///
    /// ```
    /// use composable_rust_idp::error::{HttpError, IdpError};
    ///
    /// assert!(IdpError::Network(HttpError::Timeout).is_network_error());
    /// assert!(!IdpError::InvalidNonce.is_network_error());
    /// ```
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` if the device is offline.
    #[must_use]
    pub const fn is_no_internet(&self) -> bool {
        matches!(self, Self::Network(HttpError::NoInternet))
    }

    /// Returns `true` for client-side protocol integrity failures.
    ///
    /// These are detected locally and are never retried.
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateParameter
                | Self::InvalidNonce
                | Self::ExtAuthOriginalRequestMissing
                | Self::Validation(ValidationError::ChallengeExpired)
        )
    }

    /// Structured server response, if the identity provider reported one.
    #[must_use]
    pub const fn server_response(&self) -> Option<&ServerResponse> {
        match self {
            Self::ServerError(response) => Some(response),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IdpError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decoding(error.to_string())
    }
}

/// Transport failures.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpError {
    /// The connection could not be established or broke off.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The device has no internet connection.
    #[error("no internet connection")]
    NoInternet,

    /// Unexpected HTTP status without a decodable error body.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

/// Signature and claims verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// The challenge expired before it was answered.
    #[error("challenge expired")]
    ChallengeExpired,

    /// A signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// The discovery document signature did not verify against its key.
    #[error("invalid discovery document")]
    InvalidDiscoveryDocument,

    /// A required claim was absent.
    #[error("missing claim `{0}`")]
    MissingClaim(String),

    /// A signed container was structurally invalid.
    #[error("malformed: {0}")]
    Malformed(String),
}

/// Trust store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustStoreError {
    /// The trust store could not be loaded or reached.
    #[error("trust store unavailable: {0}")]
    Unavailable(String),

    /// The certificate could not be parsed by the trust store.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// OCSP status could not be obtained or was not good.
    #[error("OCSP check failed: {0}")]
    Ocsp(String),
}

/// Internal invariant violations, one per call site.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalError {
    /// A callback URL lacked a required query parameter.
    #[error("callback URL is missing `{0}`")]
    MissingCallbackParameter(String),

    /// A URL could not be rebuilt without its query.
    #[error("invalid redirect URI")]
    InvalidRedirectUri,

    /// The discovery document lacks an endpoint for this operation.
    #[error("discovery document has no `{0}` endpoint")]
    MissingEndpoint(String),

    /// The bearer header value could not be built from the access token.
    #[error("access token is not a valid header value")]
    InvalidHeaderValue,

    /// Expiry arithmetic overflowed.
    #[error("expiry computation overflowed")]
    ExpiryOverflow,
}

/// Structured error reported by the identity provider.
///
/// Carries the identifiers support needs to correlate a failure with
/// server-side logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    /// Short error code (for example `invalid_request`).
    pub error: String,

    /// Human readable error text.
    #[serde(rename = "gematik_error_text")]
    pub error_text: String,

    /// Server timestamp in seconds since the epoch.
    #[serde(rename = "gematik_timestamp")]
    pub timestamp: i64,

    /// Request correlation id.
    #[serde(rename = "gematik_uuid")]
    pub uuid: String,

    /// Provider specific error code.
    #[serde(rename = "gematik_code")]
    pub code: String,
}

impl ServerResponse {
    /// Create a server response.
    #[must_use]
    pub fn new(
        error: impl Into<String>,
        error_text: impl Into<String>,
        timestamp: i64,
        uuid: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            error_text: error_text.into(),
            timestamp,
            uuid: uuid.into(),
            code: code.into(),
        }
    }

    /// Decode a JSON error body.
    ///
    /// Bodies that do not follow the structured shape yield a fallback
    /// response stamped with `now`.
    #[must_use]
    pub fn from_body(body: &[u8], now: i64) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| Self::fallback(now))
    }

    /// Decode the error parameters of a redirect URL.
    #[must_use]
    pub fn from_query(url: &url::Url) -> Self {
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
        };
        Self {
            error: param("error").unwrap_or_else(|| "Unable to decode error.".to_string()),
            error_text: param("gematik_error_text")
                .unwrap_or_else(|| "Unable to decode error text.".to_string()),
            timestamp: param("gematik_timestamp")
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            uuid: param("gematik_uuid").unwrap_or_else(|| "Unable to decode uuid.".to_string()),
            code: param("gematik_code").unwrap_or_else(|| "Unable to decode code.".to_string()),
        }
    }

    fn fallback(now: i64) -> Self {
        Self::new(
            "Unable to decode.",
            "Unable to decode server error",
            now,
            "unknown",
            "-1",
        )
    }
}

impl fmt::Display for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} [uuid {}, timestamp {}]",
            self.error, self.code, self.error_text, self.uuid, self.timestamp
        )
    }
}
