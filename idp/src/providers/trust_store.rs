//! Trust store trait.

use crate::crypto::curve::Certificate;
use crate::error::TrustStoreError;
use std::future::Future;

/// Validates identity provider certificates against pinned anchors.
///
/// Implementations own chain building and OCSP. Both a `false` verdict and
/// an error invalidate the discovery document, but they are reported
/// separately.
pub trait TrustStore: Send + Sync {
    /// Check whether `certificate` chains to a trusted anchor.
    ///
    /// # Errors
    ///
    /// Returns an error if the verdict cannot be established.
    fn validate(
        &self,
        certificate: &Certificate,
    ) -> impl Future<Output = std::result::Result<bool, TrustStoreError>> + Send;
}
