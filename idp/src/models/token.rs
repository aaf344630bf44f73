//! Token types.
//!
//! The identity provider returns access and ID tokens encrypted (`dir`,
//! `A256GCM`) under a one-time token key the client announced in its
//! [`KeyVerifier`]. Each envelope wraps `{"njwt": "<compact JWT>"}`.

use crate::constants::{callback, content_type};
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::{Jwt, NestedJwt};
use crate::crypto::{CryptoBox, SymmetricKey};
use crate::error::{IdpError, InternalError, Result, ServerResponse};
use crate::models::discovery::DiscoveryDocument;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Authorization code returned after a verified challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeToken {
    /// Authorization code.
    pub code: String,

    /// SSO token, if the identity provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<String>,

    /// State of the originating challenge session.
    pub state: String,
}

impl ExchangeToken {
    /// Read an exchange token from the authorization redirect.
    ///
    /// # Errors
    ///
    /// - [`IdpError::ServerError`] if the redirect carries an `error` parameter
    /// - [`InternalError::MissingCallbackParameter`] if `code` or `state` is absent
    pub fn from_redirect(url: &Url) -> Result<Self> {
        if url.query_pairs().any(|(key, _)| key == "error") {
            return Err(IdpError::ServerError(ServerResponse::from_query(url)));
        }
        Ok(Self {
            code: query_parameter(url, callback::CODE)?,
            sso: query_parameter(url, callback::SSO_TOKEN).ok(),
            state: query_parameter(url, callback::STATE)?,
        })
    }
}

/// Required query parameter of a redirect URL.
pub(crate) fn query_parameter(url: &Url, name: &str) -> Result<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| InternalError::MissingCallbackParameter(name.to_string()).into())
}

/// Token key and code verifier, sent encrypted with the code exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyVerifier {
    /// Base64url token key.
    pub token_key: String,

    /// Code verifier of the challenge session.
    pub code_verifier: String,
}

impl KeyVerifier {
    /// Bind a token key to a verifier.
    #[must_use]
    pub fn new(token_key: &SymmetricKey, code_verifier: impl Into<String>) -> Self {
        Self {
            token_key: token_key.to_base64url(),
            code_verifier: code_verifier.into(),
        }
    }

    /// Encrypt for the identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if sealing fails.
    pub fn encrypted(&self, document: &DiscoveryDocument, crypto: &CryptoBox) -> Result<Jwe> {
        let payload = serde_json::to_vec(self)?;
        Jwe::encrypt(
            &payload,
            document.encryption_public_key(),
            Some(content_type::JWT),
            None,
            crypto,
        )
    }
}

impl std::fmt::Debug for KeyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyVerifier(..)")
    }
}

/// Token response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Encrypted access token.
    pub access_token: Jwe,

    /// Lifetime of the access token in seconds.
    pub expires_in: i64,

    /// Encrypted ID token.
    pub id_token: Jwe,

    /// SSO token for silent re-authentication.
    #[serde(rename = "ssotoken", default, skip_serializing_if = "Option::is_none")]
    pub sso_token: Option<String>,

    /// Token type, `Bearer`.
    pub token_type: String,
}

/// Token payload after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedTokenPayload {
    /// Access token.
    pub access_token: Jwt,

    /// ID token.
    pub id_token: Jwt,

    /// Lifetime of the access token in seconds.
    pub expires_in: i64,

    /// SSO token.
    pub sso_token: Option<String>,

    /// Token type.
    pub token_type: String,
}

impl TokenPayload {
    /// Open both token envelopes with the token key.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decryption`] if the key does not match
    /// - [`IdpError::Decoding`] if an envelope does not wrap a nested JWT
    pub fn decrypted(&self, token_key: &SymmetricKey) -> Result<DecryptedTokenPayload> {
        Ok(DecryptedTokenPayload {
            access_token: open_nested(&self.access_token, token_key)?,
            id_token: open_nested(&self.id_token, token_key)?,
            expires_in: self.expires_in,
            sso_token: self.sso_token.clone(),
            token_type: self.token_type.clone(),
        })
    }
}

fn open_nested(jwe: &Jwe, key: &SymmetricKey) -> Result<Jwt> {
    let nested: NestedJwt = serde_json::from_slice(&jwe.decrypt_direct(key)?)?;
    Jwt::parse(&nested.njwt)
}

/// Authenticated session token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token, compact JWT.
    pub access_token: String,

    /// Absolute expiry of the access token.
    pub expires: DateTime<Utc>,

    /// ID token, compact JWT.
    pub id_token: String,

    /// SSO token for silent refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_token: Option<String>,

    /// Token type.
    pub token_type: String,

    /// Redirect URI the token was issued for.
    pub redirect: String,

    /// Issued through a federated identity provider.
    #[serde(default)]
    pub is_ext_auth: bool,
}

impl Token {
    /// Create a bearer token.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        id_token: impl Into<String>,
        expires: DateTime<Utc>,
        redirect: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expires,
            id_token: id_token.into(),
            sso_token: None,
            token_type: crate::constants::http_auth::BEARER.to_string(),
            redirect: redirect.into(),
            is_ext_auth: false,
        }
    }

    /// Attach an SSO token.
    #[must_use]
    pub fn with_sso_token(mut self, sso_token: Option<String>) -> Self {
        self.sso_token = sso_token;
        self
    }

    /// Mark as issued through federation.
    #[must_use]
    pub const fn with_ext_auth(mut self, is_ext_auth: bool) -> Self {
        self.is_ext_auth = is_ext_auth;
        self
    }

    /// Build from a decrypted payload received at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::ExpiryOverflow`] if `now + expires_in` overflows.
    pub fn from_payload(
        payload: &DecryptedTokenPayload,
        now: DateTime<Utc>,
        redirect: impl Into<String>,
    ) -> Result<Self> {
        let expires = Duration::try_seconds(payload.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or(InternalError::ExpiryOverflow)?;
        Ok(Self {
            access_token: payload.access_token.encoded(),
            expires,
            id_token: payload.id_token.encoded(),
            sso_token: payload.sso_token.clone(),
            token_type: payload.token_type.clone(),
            redirect: redirect.into(),
            is_ext_auth: false,
        })
    }

    /// `now < expires`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires
    }

    /// Whether the token is due for refresh, `leeway` before its expiry.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expires
            .checked_sub_signed(leeway)
            .is_none_or(|due| due <= now)
    }

    /// Decode the access token claims.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the access token is not a JWT.
    pub fn access_token_payload(&self) -> Result<AccessTokenPayload> {
        Jwt::parse(&self.access_token)?.decode_payload()
    }

    /// Decode the ID token claims.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the ID token is not a JWT.
    pub fn id_token_payload(&self) -> Result<IdTokenPayload> {
        Jwt::parse(&self.id_token)?.decode_payload()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("expires", &self.expires)
            .field("token_type", &self.token_type)
            .field("has_sso_token", &self.sso_token.is_some())
            .field("is_ext_auth", &self.is_ext_auth)
            .finish_non_exhaustive()
    }
}

/// Claims of an access token the client reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenPayload {
    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Claims of an ID token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenPayload {
    /// Authentication time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Nonce of the challenge session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Insurance name.
    #[serde(rename = "organizationName", default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,

    /// Profession OID.
    #[serde(rename = "professionOID", default, skip_serializing_if = "Option::is_none")]
    pub profession_oid: Option<String>,

    /// Insurance number.
    #[serde(rename = "idNummer", default, skip_serializing_if = "Option::is_none")]
    pub id_nummer: Option<String>,

    /// Authorized party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Authentication context class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Authentication methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,

    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Issued at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Token id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Access token hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
}
