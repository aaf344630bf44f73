//! Discovery document.
//!
//! The identity provider publishes its endpoints and keys as a JWT signed by
//! the discovery key (`x5c` of the JWT header). Encryption and signing keys
//! are fetched separately as JWKs.

use crate::crypto::backend::Curves;
use crate::crypto::curve::{Certificate, EcPublicKey, Jwk};
use crate::crypto::jwt::Jwt;
use crate::error::{IdpError, InternalError, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum age of a cached discovery document.
pub const MAX_AGE_HOURS: i64 = 24;

/// Signed claims of the discovery JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocumentPayload {
    /// Card and biometric authorization (challenge and verify).
    pub authorization_endpoint: Url,

    /// Silent re-authentication with an SSO token.
    pub sso_endpoint: Url,

    /// Code exchange.
    pub token_endpoint: Url,

    /// Pairing management of biometric devices.
    pub uri_pair: Url,

    /// Alternative (biometric) authentication.
    pub auth_pair_endpoint: Url,

    /// Signed directory of sectoral identity providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fed_idp_list_uri: Option<Url>,

    /// Authorization endpoint of the federated flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation_authorization_endpoint: Option<Url>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Issued at, seconds since the epoch.
    pub iat: i64,
}

/// Validated identity provider metadata.
///
/// Immutable once built. A newer document replaces an older one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DiscoveryDocumentRecord", into = "DiscoveryDocumentRecord")]
pub struct DiscoveryDocument {
    backing: Jwt,
    payload: DiscoveryDocumentPayload,
    disc_key: Certificate,
    encryption_public_key: EcPublicKey,
    signing_certificate: Certificate,
    created_on: DateTime<Utc>,
    expires_on: DateTime<Utc>,
}

impl DiscoveryDocument {
    /// Assemble a document from its JWT and the identity provider keys.
    ///
    /// The JWT signature is not checked here; see
    /// [`DiscoveryDocument::verify_signature`].
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decoding`] if the claims are malformed
    /// - [`IdpError::NoCertificateFound`] if the JWT header carries no `x5c`
    pub fn new(
        backing: Jwt,
        encryption_public_key: EcPublicKey,
        signing_certificate: Certificate,
        created_on: DateTime<Utc>,
    ) -> Result<Self> {
        let payload: DiscoveryDocumentPayload = backing.decode_payload()?;
        let disc_key = backing.header().certificate()?;
        let expires_on = Utc
            .timestamp_opt(payload.exp, 0)
            .single()
            .ok_or_else(|| IdpError::Decoding(format!("exp {} out of range", payload.exp)))?;
        Ok(Self {
            backing,
            payload,
            disc_key,
            encryption_public_key,
            signing_certificate,
            created_on,
            expires_on,
        })
    }

    /// Assemble a document from the published JWKs.
    ///
    /// The signing JWK must carry a certificate; the encryption JWK may carry
    /// coordinates or a certificate.
    ///
    /// # Errors
    ///
    /// As [`DiscoveryDocument::new`], plus [`IdpError::NoCertificateFound`]
    /// for JWKs without key material.
    pub fn from_jwks(
        backing: Jwt,
        encryption: &Jwk,
        signing: &Jwk,
        created_on: DateTime<Utc>,
    ) -> Result<Self> {
        Self::new(
            backing,
            encryption.public_key()?,
            signing.certificate()?,
            created_on,
        )
    }

    /// Signed claims.
    #[must_use]
    pub const fn payload(&self) -> &DiscoveryDocumentPayload {
        &self.payload
    }

    /// The JWT the document was built from.
    #[must_use]
    pub const fn backing(&self) -> &Jwt {
        &self.backing
    }

    /// Certificate the document is signed with.
    #[must_use]
    pub const fn disc_key(&self) -> &Certificate {
        &self.disc_key
    }

    /// Identity provider signing certificate (challenges, ID tokens, directories).
    #[must_use]
    pub const fn signing_certificate(&self) -> &Certificate {
        &self.signing_certificate
    }

    /// Key that client-to-server envelopes are encrypted for.
    #[must_use]
    pub const fn encryption_public_key(&self) -> &EcPublicKey {
        &self.encryption_public_key
    }

    /// When the document was fetched.
    #[must_use]
    pub const fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    /// Signed expiry.
    #[must_use]
    pub const fn expires_on(&self) -> DateTime<Utc> {
        self.expires_on
    }

    /// `created_on <= at <= min(expires_on, created_on + 24h)`.
    #[must_use]
    pub fn is_valid(&self, at: DateTime<Utc>) -> bool {
        self.is_valid_within(at, Duration::hours(MAX_AGE_HOURS))
    }

    /// Validity window with a custom maximum age.
    #[must_use]
    pub fn is_valid_within(&self, at: DateTime<Utc>, max_age: Duration) -> bool {
        at <= self.expires_on
            && at >= self.created_on
            && self
                .created_on
                .checked_add_signed(max_age)
                .is_none_or(|limit| at <= limit)
    }

    /// Check the JWT signature against the discovery key.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] for algorithms whose curve has no
    /// backend in `curves`.
    pub fn verify_signature(&self, curves: &Curves) -> Result<bool> {
        self.backing.verify_with(&self.disc_key, curves)
    }

    /// Directory endpoint of sectoral identity providers.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::MissingEndpoint`] if the provider does not
    /// offer federation.
    pub fn fed_idp_list_uri(&self) -> Result<&Url> {
        self.payload
            .fed_idp_list_uri
            .as_ref()
            .ok_or_else(|| InternalError::MissingEndpoint("fed_idp_list_uri".to_string()).into())
    }

    /// Authorization endpoint of the federated flow.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::MissingEndpoint`] if the provider does not
    /// offer federation.
    pub fn federation_authorization_endpoint(&self) -> Result<&Url> {
        self.payload
            .federation_authorization_endpoint
            .as_ref()
            .ok_or_else(|| {
                InternalError::MissingEndpoint("federation_authorization_endpoint".to_string())
                    .into()
            })
    }
}

/// Persisted form of a [`DiscoveryDocument`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryDocumentRecord {
    payload: Jwt,
    #[serde(rename = "puk_token")]
    signing_certificate: Certificate,
    encryption_public_key: Jwk,
    created_on: DateTime<Utc>,
}

impl TryFrom<DiscoveryDocumentRecord> for DiscoveryDocument {
    type Error = IdpError;

    fn try_from(record: DiscoveryDocumentRecord) -> Result<Self> {
        Self::new(
            record.payload,
            record.encryption_public_key.public_key()?,
            record.signing_certificate,
            record.created_on,
        )
    }
}

impl From<DiscoveryDocument> for DiscoveryDocumentRecord {
    fn from(document: DiscoveryDocument) -> Self {
        Self {
            encryption_public_key: Jwk::from_public_key(&document.encryption_public_key),
            payload: document.backing,
            signing_certificate: document.signing_certificate,
            created_on: document.created_on,
        }
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::fixtures;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_document_exposes_keys_and_endpoints() {
        let document = fixtures::discovery_document(at(1_000), at(1_300));

        assert!(document.verify_signature(&Curves::default()).unwrap());
        assert_eq!(document.disc_key(), &fixtures::discovery_certificate());
        assert_eq!(document.signing_certificate(), &fixtures::signing_certificate());
        assert_eq!(
            document.encryption_public_key(),
            &EcPublicKey::from(fixtures::encryption_key().public_key())
        );
        assert_eq!(document.expires_on(), at(1_300));
        assert!(document.fed_idp_list_uri().is_ok());
    }

    #[test]
    fn test_validity_window_boundaries() {
        let document = fixtures::discovery_document(at(1_000), at(1_300));

        assert!(!document.is_valid(at(999)));
        assert!(document.is_valid(at(1_000)));
        assert!(document.is_valid(at(1_300)));
        assert!(!document.is_valid(at(1_301)));
    }

    #[test]
    fn test_validity_capped_at_max_age() {
        let created = at(1_000);
        let document = fixtures::discovery_document(created, created + Duration::hours(48));

        assert!(document.is_valid(created + Duration::hours(24)));
        assert!(!document.is_valid(created + Duration::hours(24) + Duration::seconds(1)));
        assert!(!document.is_valid_within(created + Duration::hours(2), Duration::hours(1)));
    }

    #[test]
    fn test_persisted_form_round_trips() {
        let document = fixtures::discovery_document(at(1_000), at(1_300));
        let json = serde_json::to_value(&document).unwrap();

        assert!(json.get("puk_token").is_some());
        assert!(json.get("encryptionPublicKey").is_some());
        assert!(json.get("createdOn").is_some());
        let restored: DiscoveryDocument = serde_json::from_value(json).unwrap();
        assert_eq!(restored, document);
    }

    #[test]
    fn test_payload_endpoints_parse_as_urls() {
        let mut json = serde_json::json!({
            "authorization_endpoint": "https://idp.test/sign_response",
            "sso_endpoint": "https://idp.test/auth/alternative",
            "token_endpoint": "https://idp.test/token",
            "uri_pair": "https://idp.test/pairing",
            "auth_pair_endpoint": "https://idp.test/alt_response",
            "exp": 1_300,
            "iat": 1_000,
        });
        let payload: DiscoveryDocumentPayload = serde_json::from_value(json.clone()).unwrap();

        assert_eq!(payload.token_endpoint.path(), "/token");
        assert!(payload.fed_idp_list_uri.is_none());
        assert_eq!(serde_json::to_value(&payload).unwrap(), json);

        json["token_endpoint"] = serde_json::json!("not a url");
        assert!(serde_json::from_value::<DiscoveryDocumentPayload>(json).is_err());
    }

    #[test]
    fn test_tampered_document_fails_signature() {
        let document = fixtures::discovery_document(at(1_000), at(1_300));
        let forged = fixtures::resign_discovery_document(&document, &fixtures::signing_key());
        assert!(!forged.verify_signature(&Curves::default()).unwrap());
    }
}
