//! Software signer standing in for a health card or secure enclave.

use crate::crypto::curve::{Certificate, SecretKey};
use crate::crypto::jwt::{JwsAlgorithm, JwtSigner};
use crate::error::Result;
use crate::mocks::fixtures;

/// ES256 signer over an in-memory key.
#[derive(Debug, Clone)]
pub struct SoftwareSigner {
    key: SecretKey,
    certificates: Vec<Certificate>,
}

impl SoftwareSigner {
    /// Signer announcing `certificates`.
    #[must_use]
    pub fn new(key: SecretKey, certificates: Vec<Certificate>) -> Self {
        Self { key, certificates }
    }

    /// Signer of the fixture health card.
    #[must_use]
    pub fn card() -> Self {
        Self::new(fixtures::card_key(), vec![fixtures::card_certificate()])
    }

    /// Signer of the fixture paired device.
    #[must_use]
    pub fn device() -> Self {
        Self::new(fixtures::device_key(), vec![fixtures::device_certificate()])
    }
}

impl JwtSigner for SoftwareSigner {
    fn algorithm(&self) -> JwsAlgorithm {
        JwsAlgorithm::Es256
    }

    fn certificates(&self) -> Vec<Certificate> {
        self.certificates.clone()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(fixtures::sign_es256(&self.key, message))
    }
}
