//! Challenge and signed response types.

use crate::constants::versions;
use crate::crypto::curve::Certificate;
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::{Jwt, JwtHeader, JwtSigner, NestedJwt};
use crate::crypto::CryptoBox;
use crate::error::{IdpError, Result};
use crate::models::discovery::DiscoveryDocument;
use crate::models::pairing::{AuthenticationData, DeviceInformation};
use chrono::{DateTime, TimeZone, Utc};
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scopes and claims the user is asked to consent to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConsent {
    /// Scope name to description.
    #[serde(rename = "requested_scopes", default)]
    pub scopes: BTreeMap<String, String>,

    /// Claim name to description.
    #[serde(rename = "requested_claims", default)]
    pub claims: BTreeMap<String, String>,
}

/// Claims of a challenge token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeClaims {
    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Not before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Challenge id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Requested scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// State echoed by the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Nonce echoed by the identity provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Code challenge the challenge was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// Code challenge method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// Redirect URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// Challenge issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpChallenge {
    /// Signed challenge token.
    pub challenge: Jwt,

    /// Consent to present before signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_consent: Option<UserConsent>,
}

impl IdpChallenge {
    /// Decode the challenge claims.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the claims are malformed.
    pub fn claims(&self) -> Result<ChallengeClaims> {
        self.challenge.decode_payload()
    }

    /// Expiry of the challenge.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if `exp` is missing or out of range.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        let exp = self.claims()?.exp;
        Utc.timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| IdpError::Decoding(format!("exp {exp} out of range")))
    }

    /// Whether the challenge can no longer be answered at `at`.
    ///
    /// # Errors
    ///
    /// As [`IdpChallenge::expires_at`].
    pub fn is_expired(&self, at: DateTime<Utc>) -> Result<bool> {
        Ok(at >= self.expires_at()?)
    }
}

/// A challenge bound to the random values of one authentication attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeSession {
    /// The issued challenge.
    pub challenge: IdpChallenge,

    /// Code verifier whose S256 hash was sent with the challenge request.
    pub verifier_code: String,

    /// State sent with the challenge request.
    pub state: String,

    /// Nonce sent with the challenge request.
    pub nonce: String,
}

impl ChallengeSession {
    /// Bind a challenge to its random values.
    #[must_use]
    pub const fn new(
        challenge: IdpChallenge,
        verifier_code: String,
        state: String,
        nonce: String,
    ) -> Self {
        Self {
            challenge,
            verifier_code,
            state,
            nonce,
        }
    }

    /// Constant time comparison against the stored state.
    #[must_use]
    pub fn validate_state(&self, state: &str) -> bool {
        constant_time_eq(self.state.as_bytes(), state.as_bytes())
    }

    /// Constant time comparison against the stored nonce.
    #[must_use]
    pub fn validate_nonce(&self, nonce: Option<&str>) -> bool {
        nonce.is_some_and(|nonce| constant_time_eq(self.nonce.as_bytes(), nonce.as_bytes()))
    }

    /// Countersign the challenge with a card or enclave signer.
    ///
    /// # Errors
    ///
    /// Propagates signer failures.
    pub async fn sign<S: JwtSigner>(&self, signer: &S) -> Result<SignedChallenge> {
        let claims = NestedJwt {
            njwt: self.challenge.challenge.encoded(),
        };
        let signed = Jwt::sign(JwtHeader::nested(signer.algorithm()), &claims, signer).await?;
        tracing::debug!(algorithm = %signer.algorithm(), "Challenge signed");
        Ok(SignedChallenge {
            original_challenge: self.clone(),
            signed_challenge: signed,
        })
    }

    /// Build and sign biometric authentication data with a paired device key.
    ///
    /// # Errors
    ///
    /// Propagates signer failures.
    pub async fn sign_authentication_data<S: JwtSigner>(
        &self,
        key_identifier: &str,
        device_information: DeviceInformation,
        auth_certificate: &Certificate,
        signer: &S,
    ) -> Result<SignedAuthenticationData> {
        let data = AuthenticationData {
            authentication_data_version: versions::AUTHENTICATION_DATA.to_string(),
            challenge_token: self.challenge.challenge.encoded(),
            auth_cert: auth_certificate.clone(),
            key_identifier: key_identifier.to_string(),
            device_information,
            amr: AuthenticationData::biometric_amr(),
        };
        let header = JwtHeader::new(signer.algorithm()).with_kid(key_identifier);
        let signed = Jwt::sign(header, &data, signer).await?;
        Ok(SignedAuthenticationData {
            original_challenge: self.clone(),
            signed_authentication_data: signed,
        })
    }
}

impl std::fmt::Debug for ChallengeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeSession")
            .field("challenge", &self.challenge)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Challenge response signed by a card or enclave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChallenge {
    /// The session the response answers.
    pub original_challenge: ChallengeSession,

    /// `{"njwt": challenge}` signed by the caller's signer.
    pub signed_challenge: Jwt,
}

impl SignedChallenge {
    /// Encrypt the response for the identity provider.
    ///
    /// The envelope expires together with the challenge.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decoding`] if the challenge claims are malformed
    /// - [`IdpError::Encryption`] if sealing fails
    pub fn encrypted(&self, document: &DiscoveryDocument, crypto: &CryptoBox) -> Result<Jwe> {
        nest_for(&self.signed_challenge, &self.original_challenge, document, crypto)
    }
}

/// Biometric authentication data signed by a paired device key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAuthenticationData {
    /// The session the response answers.
    pub original_challenge: ChallengeSession,

    /// Signed [`AuthenticationData`].
    pub signed_authentication_data: Jwt,
}

impl SignedAuthenticationData {
    /// Encrypt the response for the identity provider.
    ///
    /// # Errors
    ///
    /// As [`SignedChallenge::encrypted`].
    pub fn encrypted(&self, document: &DiscoveryDocument, crypto: &CryptoBox) -> Result<Jwe> {
        nest_for(
            &self.signed_authentication_data,
            &self.original_challenge,
            document,
            crypto,
        )
    }
}

fn nest_for(
    signed: &Jwt,
    session: &ChallengeSession,
    document: &DiscoveryDocument,
    crypto: &CryptoBox,
) -> Result<Jwe> {
    let exp = session.challenge.claims()?.exp;
    Jwe::nest(signed, document.encryption_public_key(), Some(exp), crypto)
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::RandomLengths;
    use crate::crypto::random::OsRandom;
    use crate::mocks::{fixtures, SoftwareSigner};
    use std::sync::Arc;

    fn session() -> ChallengeSession {
        ChallengeSession::new(
            fixtures::challenge(2_000),
            "verifier".to_string(),
            "state-1".to_string(),
            "nonce-1".to_string(),
        )
    }

    #[test]
    fn test_state_and_nonce_validation() {
        let session = session();
        assert!(session.validate_state("state-1"));
        assert!(!session.validate_state("other"));
        assert!(!session.validate_state(""));
        assert!(session.validate_nonce(Some("nonce-1")));
        assert!(!session.validate_nonce(Some("nonce-2")));
        assert!(!session.validate_nonce(None));
    }

    #[test]
    fn test_expiry_from_claims() {
        let challenge = fixtures::challenge(2_000);
        let expiry = Utc.timestamp_opt(2_000, 0).unwrap();
        assert_eq!(challenge.expires_at().unwrap(), expiry);
        assert!(!challenge.is_expired(Utc.timestamp_opt(1_999, 0).unwrap()).unwrap());
        assert!(challenge.is_expired(expiry).unwrap());
    }

    #[tokio::test]
    async fn test_signed_challenge_wraps_original_and_encrypts() {
        let session = session();
        let signed = session.sign(&SoftwareSigner::card()).await.unwrap();

        let nested: NestedJwt = signed.signed_challenge.decode_payload().unwrap();
        assert_eq!(nested.njwt, session.challenge.challenge.encoded());
        assert_eq!(signed.signed_challenge.header().cty.as_deref(), Some("NJWT"));

        let document = fixtures::discovery_document(
            Utc.timestamp_opt(1_000, 0).unwrap(),
            Utc.timestamp_opt(5_000, 0).unwrap(),
        );
        let crypto = CryptoBox::new(Arc::new(OsRandom), RandomLengths::default());
        let jwe = signed.encrypted(&document, &crypto).unwrap();
        assert_eq!(jwe.header().exp, Some(2_000));
        assert_eq!(jwe.header().cty.as_deref(), Some("NJWT"));

        let plaintext = jwe.decrypt(&fixtures::encryption_key()).unwrap();
        let outer: NestedJwt = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(outer.njwt, signed.signed_challenge.encoded());
    }

    #[tokio::test]
    async fn test_authentication_data_carries_key_identifier() {
        let signer = SoftwareSigner::device();
        let signed = session()
            .sign_authentication_data(
                "key-1",
                fixtures::device_information(),
                &fixtures::device_certificate(),
                &signer,
            )
            .await
            .unwrap();

        let data: AuthenticationData = signed.signed_authentication_data.decode_payload().unwrap();
        assert_eq!(data.key_identifier, "key-1");
        assert_eq!(data.authentication_data_version, "1.0");
        assert_eq!(data.challenge_token, session().challenge.challenge.encoded());
        assert_eq!(signed.signed_authentication_data.header().kid.as_deref(), Some("key-1"));
        assert!(signed
            .signed_authentication_data
            .verify(&fixtures::device_certificate())
            .unwrap());
    }
}
