//! JWE compact serialization with `A256GCM` content encryption.
//!
//! Two key management modes are supported:
//!
//! - `ECDH-ES` direct key agreement towards the identity provider's
//!   encryption key, with a fresh ephemeral key per envelope
//! - `dir` with a shared symmetric key, used for token payloads the
//!   identity provider returns under the session's token key
//!
//! The encoded protected header is the AES-GCM additional authenticated data.

use crate::constants::{content_type, jose};
use crate::crypto::curve::{EcPublicKey, Jwk, SecretKey};
use crate::crypto::jwt::{Jwt, NestedJwt};
use crate::crypto::{
    CryptoBox, IV_LEN, SymmetricKey, base64url_decode, base64url_encode, concat_kdf,
};
use crate::error::{IdpError, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// JWE protected header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweHeader {
    /// Key management algorithm.
    pub alg: String,

    /// Content encryption algorithm.
    pub enc: String,

    /// Content type of the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,

    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Expiry of the enclosed content, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Ephemeral public key (`ECDH-ES` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epk: Option<Jwk>,

    /// Key id of the recipient key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl JweHeader {
    /// `ECDH-ES` / `A256GCM` header carrying `epk`.
    #[must_use]
    pub fn ecdh_es(ephemeral_public_key: &EcPublicKey) -> Self {
        Self {
            alg: jose::ALG_ECDH_ES.to_string(),
            enc: jose::ENC_A256GCM.to_string(),
            cty: None,
            typ: None,
            exp: None,
            epk: Some(Jwk::from_public_key(ephemeral_public_key)),
            kid: None,
        }
    }

    /// `dir` / `A256GCM` header.
    #[must_use]
    pub fn direct() -> Self {
        Self {
            alg: jose::ALG_DIR.to_string(),
            enc: jose::ENC_A256GCM.to_string(),
            cty: None,
            typ: None,
            exp: None,
            epk: None,
            kid: None,
        }
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, cty: Option<&str>) -> Self {
        self.cty = cty.map(str::to_string);
        self
    }

    /// Set the expiry.
    #[must_use]
    pub const fn with_expiry(mut self, exp: Option<i64>) -> Self {
        self.exp = exp;
        self
    }
}

/// Encrypted JWE in compact form.
#[derive(Clone, PartialEq, Eq)]
pub struct Jwe {
    header: JweHeader,
    encoded_header: String,
    encrypted_key: Vec<u8>,
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl Jwe {
    /// Encrypt `plaintext` for `recipient` using `ECDH-ES` direct key agreement.
    ///
    /// The agreement runs on `crypto`'s backend for the recipient's curve.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Unsupported`] if no backend serves the recipient's curve
    /// - [`IdpError::Encryption`] if randomness or AES-GCM fails
    pub fn encrypt(
        plaintext: &[u8],
        recipient: &EcPublicKey,
        content_type: Option<&str>,
        expires: Option<i64>,
        crypto: &CryptoBox,
    ) -> Result<Self> {
        let content = crypto.derive_content_key(recipient, jose::ENC_A256GCM)?;
        let header = JweHeader::ecdh_es(&content.ephemeral_public_key)
            .with_content_type(content_type)
            .with_expiry(expires);
        Self::seal(header, &content.key, crypto.generate_iv()?, plaintext)
    }

    /// Encrypt `plaintext` under a shared key (`alg: dir`).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if randomness or AES-GCM fails.
    pub fn encrypt_direct(
        plaintext: &[u8],
        key: &SymmetricKey,
        content_type: Option<&str>,
        crypto: &CryptoBox,
    ) -> Result<Self> {
        let header = JweHeader::direct().with_content_type(content_type);
        Self::seal(header, key, crypto.generate_iv()?, plaintext)
    }

    /// Wrap a signed token as `{"njwt": ...}` with `cty: NJWT`.
    ///
    /// # Errors
    ///
    /// Same as [`Jwe::encrypt`].
    pub fn nest(
        jwt: &Jwt,
        recipient: &EcPublicKey,
        expires: Option<i64>,
        crypto: &CryptoBox,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(&NestedJwt { njwt: jwt.encoded() })?;
        Self::encrypt(
            &payload,
            recipient,
            Some(content_type::NESTED_JWT),
            expires,
            crypto,
        )
    }

    /// Encrypt with an explicit header, key and IV.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if AES-GCM fails.
    pub fn seal(
        header: JweHeader,
        key: &SymmetricKey,
        iv: [u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Self> {
        let encoded_header = base64url_encode(&serde_json::to_vec(&header)?);
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| IdpError::Encryption)?;
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: encoded_header.as_bytes(),
                },
            )
            .map_err(|_| IdpError::Encryption)?;
        let tag = sealed.split_off(sealed.len().saturating_sub(TAG_LEN));
        Ok(Self {
            header,
            encoded_header,
            encrypted_key: Vec::new(),
            iv,
            ciphertext: sealed,
            tag,
        })
    }

    /// Parse a compact serialization.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] unless the input has five base64url
    /// parts, a JSON header and a 96-bit IV.
    pub fn parse(compact: &str) -> Result<Self> {
        let parts: Vec<&str> = compact.trim().split('.').collect();
        let [header, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
            return Err(IdpError::Decoding("JWE must have five parts".to_string()));
        };
        let decoded_header: JweHeader = serde_json::from_slice(&base64url_decode(header)?)?;
        let iv: [u8; IV_LEN] = base64url_decode(iv)?
            .try_into()
            .map_err(|_| IdpError::Decoding("JWE IV length".to_string()))?;
        Ok(Self {
            header: decoded_header,
            encoded_header: (*header).to_string(),
            encrypted_key: base64url_decode(encrypted_key)?,
            iv,
            ciphertext: base64url_decode(ciphertext)?,
            tag: base64url_decode(tag)?,
        })
    }

    /// Protected header.
    #[must_use]
    pub const fn header(&self) -> &JweHeader {
        &self.header
    }

    /// Decrypt with a shared key.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Unsupported`] for content encryption other than `A256GCM`
    /// - [`IdpError::Decryption`] if the key is wrong or the envelope was altered
    pub fn decrypt_direct(&self, key: &SymmetricKey) -> Result<Vec<u8>> {
        if self.header.enc != jose::ENC_A256GCM {
            return Err(IdpError::Unsupported(Some(format!("enc {}", self.header.enc))));
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| IdpError::Decryption)?;
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + self.tag.len());
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);
        cipher
            .decrypt(
                Nonce::from_slice(&self.iv),
                Payload {
                    msg: &sealed,
                    aad: self.encoded_header.as_bytes(),
                },
            )
            .map_err(|_| IdpError::Decryption)
    }

    /// Decrypt an `ECDH-ES` envelope as its P-256 recipient.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decryption`] if the header carries no usable `epk`
    /// - otherwise as [`Jwe::decrypt_direct`]
    pub fn decrypt(&self, recipient: &SecretKey) -> Result<Vec<u8>> {
        let epk = self
            .header
            .epk
            .as_ref()
            .ok_or(IdpError::Decryption)?
            .public_key()
            .and_then(|epk| epk.to_p256())
            .map_err(|_| IdpError::Decryption)?;
        let shared = p256::ecdh::diffie_hellman(recipient.to_nonzero_scalar(), epk.as_affine());
        let key = concat_kdf(shared.raw_secret_bytes(), &self.header.enc, 256);
        self.decrypt_direct(&key)
    }

    /// Compact serialization.
    #[must_use]
    pub fn encoded(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.encoded_header,
            base64url_encode(&self.encrypted_key),
            base64url_encode(&self.iv),
            base64url_encode(&self.ciphertext),
            base64url_encode(&self.tag)
        )
    }
}

impl FromStr for Jwe {
    type Err = IdpError;

    fn from_str(compact: &str) -> Result<Self> {
        Self::parse(compact)
    }
}

impl fmt::Display for Jwe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded())
    }
}

impl fmt::Debug for Jwe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwe")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Serialize for Jwe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for Jwe {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let compact = String::deserialize(deserializer)?;
        Self::parse(&compact).map_err(serde::de::Error::custom)
    }
}
