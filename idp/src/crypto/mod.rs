//! Crypto toolkit.
//!
//! Draws verifier, state and nonce values, computes code challenges and
//! derives one-time content keys for JWE envelopes. The JOSE containers
//! themselves live in [`jwt`] and [`jwe`]; curve arithmetic in [`backend`].

pub mod backend;
pub mod curve;
pub mod jwe;
pub mod jwt;
pub mod random;

use crate::config::RandomLengths;
use crate::error::{IdpError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use backend::Curves;
use curve::EcPublicKey;
use random::RandomSource;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use zeroize::Zeroizing;

pub use backend::{CurveBackend, P256Backend};
pub use curve::{Certificate, Curve, Jwk};
pub use jwe::{Jwe, JweHeader};
pub use jwt::{JwsAlgorithm, Jwt, JwtHeader, JwtSigner};

/// AES-GCM IV length in bytes.
pub const IV_LEN: usize = 12;

/// Symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Symmetric key length in bits.
const KEY_BITS: u32 = 256;

/// Base64url encode bytes without padding.
#[must_use]
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Base64url decode a string without padding.
///
/// # Errors
///
/// Returns [`IdpError::Decoding`] on invalid input.
pub fn base64url_decode(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|error| IdpError::Decoding(format!("base64url: {error}")))
}

/// 256-bit symmetric key, wiped on drop.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LEN]>);

impl SymmetricKey {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decryption`] if `bytes` is not 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| IdpError::Decryption)?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Base64url encoding, as carried in a key verifier.
    #[must_use]
    pub fn to_base64url(&self) -> String {
        base64url_encode(self.0.as_slice())
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// One-time content key agreed with a recipient.
#[derive(Debug)]
pub struct ContentKey {
    /// Ephemeral public key to publish in the JWE header as `epk`.
    pub ephemeral_public_key: EcPublicKey,

    /// Derived AES-256 key.
    pub key: SymmetricKey,
}

/// Concat KDF (NIST SP 800-56A, single round for 256 bits).
///
/// `SHA-256(1 || Z || len(alg) || alg || 0 || 0 || keydatalen)` with empty
/// party info, as used by JWE `ECDH-ES` direct key agreement.
#[must_use]
pub fn concat_kdf(shared_secret: &[u8], algorithm: &str, key_data_len_bits: u32) -> SymmetricKey {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(shared_secret);
    hasher.update(u32::try_from(algorithm.len()).unwrap_or(u32::MAX).to_be_bytes());
    hasher.update(algorithm.as_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(0u32.to_be_bytes());
    hasher.update(key_data_len_bits.to_be_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&hasher.finalize());
    SymmetricKey(key)
}

/// Crypto toolkit bound to a random source and a set of curve backends.
#[derive(Clone)]
pub struct CryptoBox {
    random: Arc<dyn RandomSource>,
    lengths: RandomLengths,
    curves: Curves,
}

impl CryptoBox {
    /// Create a toolkit with the built-in P-256 backend.
    #[must_use]
    pub fn new(random: Arc<dyn RandomSource>, lengths: RandomLengths) -> Self {
        Self {
            random,
            lengths,
            curves: Curves::default(),
        }
    }

    /// Replace the curve backends.
    #[must_use]
    pub fn with_curves(mut self, curves: Curves) -> Self {
        self.curves = curves;
        self
    }

    /// Curve backends used for signatures and key agreement.
    #[must_use]
    pub const fn curves(&self) -> &Curves {
        &self.curves
    }

    /// Draw `length` random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn random_bytes(&self, length: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length];
        self.random.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Draw a code verifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn generate_verifier(&self) -> Result<String> {
        self.random_bytes(self.lengths.verifier)
            .map(|bytes| base64url_encode(&bytes))
    }

    /// Draw a state value.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn generate_state(&self) -> Result<String> {
        self.random_bytes(self.lengths.state)
            .map(|bytes| base64url_encode(&bytes))
    }

    /// Draw a nonce.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn generate_nonce(&self) -> Result<String> {
        self.random_bytes(self.lengths.nonce)
            .map(|bytes| base64url_encode(&bytes))
    }

    /// Draw a fresh AES-256 key for token payload decryption.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn generate_token_key(&self) -> Result<SymmetricKey> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.random.fill(key.as_mut_slice())?;
        Ok(SymmetricKey(key))
    }

    /// Draw an AES-GCM IV.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the random source fails.
    pub fn generate_iv(&self) -> Result<[u8; IV_LEN]> {
        let mut iv = [0u8; IV_LEN];
        self.random.fill(&mut iv)?;
        Ok(iv)
    }

    /// `base64url(SHA-256(verifier))`.
    ///
    /// # Examples
    ///
    /// ```
    /// use composable_rust_idp::crypto::CryptoBox;
    ///
    /// // RFC 7636 appendix B
    /// assert_eq!(
    ///     CryptoBox::code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
    ///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
    /// );
    /// ```
    #[must_use]
    pub fn code_challenge(verifier: &str) -> String {
        base64url_encode(&Sha256::digest(verifier.as_bytes()))
    }

    /// Agree a one-time content key with `recipient`.
    ///
    /// The backend for the recipient's curve generates a new ephemeral key
    /// pair on every call and drops it afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if no backend serves the
    /// recipient's curve.
    pub fn derive_content_key(&self, recipient: &EcPublicKey, algorithm: &str) -> Result<ContentKey> {
        let agreement = self.curves.agree_ephemeral(recipient)?;
        Ok(ContentKey {
            ephemeral_public_key: agreement.ephemeral_public_key,
            key: concat_kdf(&agreement.shared_secret, algorithm, KEY_BITS),
        })
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("lengths", &self.lengths)
            .field("curves", &self.curves)
            .finish_non_exhaustive()
    }
}
