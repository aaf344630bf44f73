//! Mock trust store.

use crate::crypto::curve::Certificate;
use crate::error::TrustStoreError;
use crate::providers::TrustStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Verdict the mock returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustVerdict {
    /// Every certificate is trusted.
    Accept,
    /// Every certificate is untrusted.
    Reject,
    /// Validation fails with an error.
    Fail(TrustStoreError),
}

/// Trust store with a configurable verdict.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone)]
pub struct MockTrustStore {
    verdict: Arc<Mutex<TrustVerdict>>,
    validations: Arc<AtomicUsize>,
}

impl MockTrustStore {
    /// Trust store with `verdict`.
    #[must_use]
    pub fn new(verdict: TrustVerdict) -> Self {
        Self {
            verdict: Arc::new(Mutex::new(verdict)),
            validations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Trust store accepting every certificate.
    #[must_use]
    pub fn accepting() -> Self {
        Self::new(TrustVerdict::Accept)
    }

    /// Trust store rejecting every certificate.
    #[must_use]
    pub fn rejecting() -> Self {
        Self::new(TrustVerdict::Reject)
    }

    /// Trust store failing with `error`.
    #[must_use]
    pub fn failing(error: TrustStoreError) -> Self {
        Self::new(TrustVerdict::Fail(error))
    }

    /// Change the verdict.
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn set_verdict(&self, verdict: TrustVerdict) {
        *self.verdict.lock().unwrap() = verdict;
    }

    /// Number of `validate` calls.
    #[must_use]
    pub fn validation_count(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

impl Default for MockTrustStore {
    fn default() -> Self {
        Self::accepting()
    }
}

impl TrustStore for MockTrustStore {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn validate(&self, _certificate: &Certificate) -> Result<bool, TrustStoreError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let verdict = self.verdict.lock().unwrap().clone();
        match verdict {
            TrustVerdict::Accept => Ok(true),
            TrustVerdict::Reject => Ok(false),
            TrustVerdict::Fail(error) => Err(error),
        }
    }
}
