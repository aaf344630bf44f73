//! Discovery document reconciliation.
//!
//! A document is usable when its time window contains `now` and the trust
//! store accepts both the discovery key certificate and the signing
//! certificate. A freshly fetched document must additionally carry a valid
//! signature by its discovery key.

use super::IdpSession;
use crate::error::{IdpError, Result, ValidationError};
use crate::models::DiscoveryDocument;
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use tokio::sync::watch;

/// Lifecycle of the session's discovery document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No document cached.
    Absent,
    /// A cached document awaits reconciliation, or a new one is being fetched.
    Loading,
    /// The stored document passed validation.
    Valid,
    /// The last reconciliation failed; storage holds no document.
    Invalid,
}

/// Why a document was refused.
struct Rejection {
    error: IdpError,
    /// The document failed a trust decision rather than a freshness check.
    untrusted: bool,
}

impl Rejection {
    const fn stale(error: IdpError) -> Self {
        Self {
            error,
            untrusted: false,
        }
    }

    const fn untrusted(error: IdpError) -> Self {
        Self {
            error,
            untrusted: true,
        }
    }
}

/// Puts the previous state back unless the reconciliation settles.
///
/// A `current_document` future dropped mid-fetch would otherwise leave
/// observers looking at [`DiscoveryState::Loading`] forever.
struct StateGuard<'a> {
    state: &'a watch::Sender<DiscoveryState>,
    previous: DiscoveryState,
    settled: bool,
}

impl<'a> StateGuard<'a> {
    fn new(state: &'a watch::Sender<DiscoveryState>) -> Self {
        let previous = *state.borrow();
        Self {
            state,
            previous,
            settled: false,
        }
    }

    fn loading(&self) {
        self.state.send_replace(DiscoveryState::Loading);
    }

    fn settle(mut self, next: DiscoveryState) {
        self.settled = true;
        self.state.send_replace(next);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.send_replace(self.previous);
        }
    }
}

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Observe the discovery document lifecycle.
    #[must_use]
    pub fn discovery_state(&self) -> watch::Receiver<DiscoveryState> {
        self.discovery_state.subscribe()
    }

    /// The discovery document to use for the next operation.
    ///
    /// Returns the cached document if it still validates. Otherwise, or when
    /// `force_refresh` is set, fetches a new one, validates it and writes it
    /// back. Concurrent callers are serialized and all see the same result.
    ///
    /// On failure storage is left without a document. If the failure was a
    /// trust decision the stored token is cleared as well, since it was
    /// issued under keys that are no longer trusted.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Network`] / [`IdpError::ServerError`] if fetching fails
    /// - [`IdpError::Validation`] if the fetched document's signature is invalid
    /// - [`IdpError::InvalidDiscoveryDocument`] if the document is outside its
    ///   time window or a certificate is not trusted
    /// - [`IdpError::TrustStore`] if the trust store cannot decide
    pub async fn current_document(&self, force_refresh: bool) -> Result<DiscoveryDocument> {
        let _guard = self.discovery_lock.lock().await;
        let state = StateGuard::new(&self.discovery_state);
        let mut untrusted = false;

        if !force_refresh {
            if let Some(cached) = self.env.storage.discovery_document() {
                match self.reconcile(&cached).await {
                    Ok(()) => {
                        state.settle(DiscoveryState::Valid);
                        return Ok(cached);
                    }
                    Err(rejection) => {
                        tracing::info!(
                            error = %rejection.error,
                            untrusted = rejection.untrusted,
                            "Evicting cached discovery document"
                        );
                        untrusted = rejection.untrusted;
                    }
                }
            }
        }

        state.loading();
        match self.fetch_document().await {
            Ok(document) => {
                tracing::info!(
                    created_on = %document.created_on(),
                    expires_on = %document.expires_on(),
                    "Discovery document updated"
                );
                self.env
                    .storage
                    .set_discovery_document(Some(document.clone()));
                state.settle(DiscoveryState::Valid);
                Ok(document)
            }
            Err(rejection) => {
                self.env.storage.set_discovery_document(None);
                if untrusted || rejection.untrusted {
                    tracing::warn!("Discovery document untrusted, clearing token");
                    self.env.storage.set_token(None);
                }
                tracing::error!(error = %rejection.error, "Discovery document rejected");
                state.settle(DiscoveryState::Invalid);
                Err(rejection.error)
            }
        }
    }

    /// Drop the stored document so the next operation fetches a new one.
    pub fn invalidate_discovery_document(&self) {
        self.env.storage.set_discovery_document(None);
        self.discovery_state.send_replace(DiscoveryState::Absent);
    }

    async fn fetch_document(&self) -> std::result::Result<DiscoveryDocument, Rejection> {
        let document = self
            .env
            .transport
            .fetch_discovery_document()
            .await
            .map_err(Rejection::stale)?;
        match document.verify_signature(self.crypto.curves()) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Rejection::untrusted(
                    ValidationError::InvalidDiscoveryDocument.into(),
                ));
            }
            Err(error) => return Err(Rejection::stale(error)),
        }
        self.reconcile(&document).await?;
        Ok(document)
    }

    async fn reconcile(&self, document: &DiscoveryDocument) -> std::result::Result<(), Rejection> {
        if !document.is_valid_within(self.now(), self.config.discovery_max_age) {
            return Err(Rejection::stale(IdpError::InvalidDiscoveryDocument));
        }
        for certificate in [document.disc_key(), document.signing_certificate()] {
            match self.env.trust_store.validate(certificate).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(subject = certificate.subject(), "Certificate not trusted");
                    return Err(Rejection::untrusted(IdpError::InvalidDiscoveryDocument));
                }
                Err(error) => return Err(Rejection::untrusted(error.into())),
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{HttpError, TrustStoreError};
    use crate::mocks::{TransportCall, TrustVerdict, fixtures};
    use crate::models::Token;
    use crate::providers::MemoryStorage;
    use crate::session::test_support::{START, harness, harness_with};
    use chrono::{DateTime, Duration, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn stored_token() -> Token {
        Token::new("T1", "I1", at(START + 300), "https://redirect.test/erezept")
    }

    #[tokio::test]
    async fn test_fetches_and_stores_when_absent() {
        let h = harness();
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Absent);

        let document = h.session.current_document(false).await.unwrap();

        assert_eq!(document.created_on(), at(START));
        assert!(h.storage.discovery_document().is_some());
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Valid);
        assert_eq!(h.trust_store.validation_count(), 2);
    }

    #[tokio::test]
    async fn test_valid_cached_document_is_reused() {
        let cached = fixtures::discovery_document(at(START - 60), at(START + 3_600));
        let h = harness_with(MemoryStorage::with_contents(None, Some(cached.clone())));

        let document = h.session.current_document(false).await.unwrap();

        assert_eq!(document, cached);
        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 0);
    }

    #[tokio::test]
    async fn test_expired_cached_document_is_replaced() {
        let cached = fixtures::discovery_document(at(START - 600), at(START - 300));
        let h = harness_with(MemoryStorage::with_contents(Some(stored_token()), Some(cached)));

        let document = h.session.current_document(false).await.unwrap();

        assert_eq!(document.created_on(), at(START));
        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
        assert!(h.storage.token().is_some());
    }

    #[tokio::test]
    async fn test_document_older_than_max_age_is_replaced() {
        let cached = fixtures::discovery_document(at(START) - Duration::hours(25), at(START + 3_600));
        let h = harness_with(MemoryStorage::with_contents(None, Some(cached)));

        h.session.current_document(false).await.unwrap();

        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_cache() {
        let cached = fixtures::discovery_document(at(START - 60), at(START + 3_600));
        let h = harness_with(MemoryStorage::with_contents(None, Some(cached)));

        let document = h.session.current_document(true).await.unwrap();

        assert_eq!(document.created_on(), at(START));
        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
    }

    #[tokio::test]
    async fn test_untrusted_certificate_clears_document_and_token() {
        let cached = fixtures::discovery_document(at(START - 60), at(START + 3_600));
        let h = harness_with(MemoryStorage::with_contents(Some(stored_token()), Some(cached)));
        h.trust_store.set_verdict(TrustVerdict::Reject);

        let error = h.session.current_document(false).await.unwrap_err();

        assert_eq!(error, IdpError::InvalidDiscoveryDocument);
        assert!(h.storage.discovery_document().is_none());
        assert!(h.storage.token().is_none());
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Invalid);
    }

    #[tokio::test]
    async fn test_trust_store_failure_is_reported_as_such() {
        let h = harness();
        h.trust_store.set_verdict(TrustVerdict::Fail(TrustStoreError::Ocsp(
            "responder unreachable".to_string(),
        )));

        let error = h.session.current_document(false).await.unwrap_err();

        assert!(matches!(error, IdpError::TrustStore(TrustStoreError::Ocsp(_))));
        assert!(h.storage.discovery_document().is_none());
    }

    #[tokio::test]
    async fn test_forged_signature_is_a_validation_error() {
        let h = harness_with(MemoryStorage::with_contents(Some(stored_token()), None));
        h.transport.forge_discovery_signature(true);

        let error = h.session.current_document(false).await.unwrap_err();

        assert_eq!(
            error,
            IdpError::Validation(ValidationError::InvalidDiscoveryDocument)
        );
        assert!(h.storage.token().is_none());
        assert_eq!(h.trust_store.validation_count(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_keeps_token() {
        let h = harness_with(MemoryStorage::with_contents(Some(stored_token()), None));
        h.transport.fail_next(
            TransportCall::FetchDiscoveryDocument,
            IdpError::Network(HttpError::NoInternet),
        );

        let error = h.session.current_document(false).await.unwrap_err();

        assert!(error.is_no_internet());
        assert!(h.storage.token().is_some());
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Invalid);

        // The next call retries and succeeds.
        h.session.current_document(false).await.unwrap();
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Valid);
    }

    #[tokio::test]
    async fn test_fetched_document_outside_window_is_rejected() {
        let h = harness();
        h.transport
            .set_discovery_window(at(START + 60), at(START + 3_600));

        let error = h.session.current_document(false).await.unwrap_err();

        assert_eq!(error, IdpError::InvalidDiscoveryDocument);
        assert!(h.storage.discovery_document().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_discovery_document() {
        let h = harness();
        h.session.current_document(false).await.unwrap();

        h.session.invalidate_discovery_document();

        assert!(h.storage.discovery_document().is_none());
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_restores_state_and_storage() {
        let h = harness();
        h.transport.hold(TransportCall::FetchDiscoveryDocument);

        let dropped =
            tokio::time::timeout(std::time::Duration::from_secs(30), h.session.current_document(false))
                .await;

        assert!(dropped.is_err());
        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
        assert!(h.storage.discovery_document().is_none());
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Absent);

        h.transport.release(TransportCall::FetchDiscoveryDocument);
        h.session.current_document(false).await.unwrap();
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_forced_refresh_keeps_cached_document() {
        let cached = fixtures::discovery_document(at(START - 60), at(START + 3_600));
        let h = harness_with(MemoryStorage::with_contents(Some(stored_token()), Some(cached.clone())));
        h.session.connect().await;
        h.transport.hold(TransportCall::FetchDiscoveryDocument);

        let dropped =
            tokio::time::timeout(std::time::Duration::from_secs(30), h.session.current_document(true))
                .await;

        assert!(dropped.is_err());
        assert_eq!(h.storage.discovery_document(), Some(cached));
        assert_eq!(h.storage.token(), Some(stored_token()));
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Valid);
    }

    #[tokio::test]
    async fn test_connect_reconciles_cached_document() {
        let cached = fixtures::discovery_document(at(START - 600), at(START - 300));
        let h = harness_with(MemoryStorage::with_contents(None, Some(cached)));
        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Loading);

        h.session.connect().await;

        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Valid);
        assert_eq!(h.storage.discovery_document().unwrap().created_on(), at(START));
        assert_eq!(h.transport.call_count(TransportCall::FetchDiscoveryDocument), 1);
    }

    #[tokio::test]
    async fn test_connect_swallows_failures() {
        let h = harness();
        h.transport.fail_next(
            TransportCall::FetchDiscoveryDocument,
            IdpError::Network(HttpError::NoInternet),
        );

        h.session.connect().await;

        assert_eq!(*h.session.discovery_state().borrow(), DiscoveryState::Invalid);
        assert!(h.storage.discovery_document().is_none());
    }
}
