//! Pluggable elliptic curve arithmetic.
//!
//! Signature checks and key agreement run in a [`CurveBackend`] chosen by
//! the key's [`Curve`]. P-256 ships with the crate. A brainpoolP256r1
//! backend, for example one built on the `bp256` crate, is registered with
//! [`Curves::with_backend`] and handed to the session through
//! [`IdpEnvironment::with_curves`](crate::environment::IdpEnvironment::with_curves).

use crate::crypto::curve::{Curve, EcPublicKey};
use crate::crypto::jwt::JwsAlgorithm;
use crate::error::{IdpError, Result};
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Outcome of an ephemeral-static key agreement.
pub struct Agreement {
    /// Ephemeral public key, published as the JWE `epk`.
    pub ephemeral_public_key: EcPublicKey,

    /// Shared secret `Z`: the x coordinate of the agreed point.
    pub shared_secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Agreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agreement")
            .field("ephemeral_public_key", &self.ephemeral_public_key)
            .finish_non_exhaustive()
    }
}

/// Arithmetic on one curve.
pub trait CurveBackend: Send + Sync {
    /// Curve served by this backend.
    fn curve(&self) -> Curve;

    /// Verify a raw `r || s` ECDSA signature with SHA-256 over `message`.
    ///
    /// Returns `Ok(false)` for a signature that does not match or is not
    /// well formed.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if `public_key` is not a point on
    /// this backend's curve.
    fn verify(&self, public_key: &EcPublicKey, message: &[u8], signature: &[u8]) -> Result<bool>;

    /// Generate a fresh ephemeral key and agree a secret with `recipient`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if `recipient` is not a point on
    /// this backend's curve, or [`IdpError::Encryption`] if key generation
    /// fails.
    fn agree_ephemeral(&self, recipient: &EcPublicKey) -> Result<Agreement>;
}

/// NIST P-256 on the `p256` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct P256Backend;

impl CurveBackend for P256Backend {
    fn curve(&self) -> Curve {
        Curve::P256
    }

    fn verify(&self, public_key: &EcPublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
        let public_key = public_key.to_p256()?;
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(VerifyingKey::from(&public_key)
            .verify(message, &signature)
            .is_ok())
    }

    fn agree_ephemeral(&self, recipient: &EcPublicKey) -> Result<Agreement> {
        let recipient = recipient.to_p256()?;
        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let shared = ephemeral.diffie_hellman(&recipient);
        Ok(Agreement {
            ephemeral_public_key: EcPublicKey::from(ephemeral.public_key()),
            shared_secret: Zeroizing::new(shared.raw_secret_bytes().to_vec()),
        })
    }
}

/// Registry of curve backends.
#[derive(Clone)]
pub struct Curves {
    backends: HashMap<Curve, Arc<dyn CurveBackend>>,
}

impl Curves {
    /// Registry with the built-in P-256 backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
        .with_backend(Arc::new(P256Backend))
    }

    /// Register `backend` for its curve, replacing any previous one.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn CurveBackend>) -> Self {
        self.backends.insert(backend.curve(), backend);
        self
    }

    /// Backend for `curve`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if none is registered.
    pub fn backend(&self, curve: Curve) -> Result<&dyn CurveBackend> {
        self.backends
            .get(&curve)
            .map(|backend| &**backend)
            .ok_or_else(|| IdpError::Unsupported(Some(format!("curve {curve}"))))
    }

    /// Verify a JWS signature made with `algorithm`.
    ///
    /// A key on a curve other than the algorithm's never verifies.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if no backend serves the
    /// algorithm's curve.
    pub fn verify(
        &self,
        algorithm: JwsAlgorithm,
        public_key: &EcPublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let backend = self.backend(algorithm.curve())?;
        if public_key.curve() != backend.curve() {
            tracing::debug!(
                algorithm = %algorithm,
                key_curve = %public_key.curve(),
                "Signer key does not match the declared algorithm"
            );
            return Ok(false);
        }
        backend.verify(public_key, message, signature)
    }

    /// Agree an ephemeral secret with `recipient` on its curve.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Unsupported`] if no backend serves the
    /// recipient's curve, otherwise as [`CurveBackend::agree_ephemeral`].
    pub fn agree_ephemeral(&self, recipient: &EcPublicKey) -> Result<Agreement> {
        self.backend(recipient.curve())?.agree_ephemeral(recipient)
    }
}

impl Default for Curves {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Curves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.backends.keys()).finish()
    }
}
