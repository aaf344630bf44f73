//! Secure random byte generation.

use crate::error::{IdpError, Result};
use rand::RngCore;
use rand::rngs::OsRng;

/// Source of cryptographically secure random bytes.
///
/// Injectable so tests can script the exact draws of an authentication
/// attempt.
pub trait RandomSource: Send + Sync {
    /// Fill `buffer` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the source cannot produce bytes.
    fn fill(&self, buffer: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buffer: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(buffer).map_err(|error| {
            tracing::error!(error = %error, "OS random source failed");
            IdpError::Encryption
        })
    }
}
