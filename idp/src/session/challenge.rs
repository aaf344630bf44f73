//! Challenge/response.

use super::IdpSession;
use crate::constants::pkce;
use crate::crypto::CryptoBox;
use crate::error::{IdpError, Result, ValidationError};
use crate::models::{ChallengeSession, DiscoveryDocument, ExchangeToken, SignedChallenge};
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use async_stream::stream;
use futures::Stream;

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Request a challenge bound to fresh verifier, state and nonce values.
    ///
    /// # Errors
    ///
    /// - discovery document errors, see [`IdpSession::current_document`]
    /// - [`ValidationError::InvalidSignature`] if the challenge is not signed
    ///   by the identity provider signing certificate
    /// - [`ValidationError::ChallengeExpired`] if it arrives already expired
    pub async fn request_challenge(&self) -> Result<ChallengeSession> {
        let document = self.current_document(false).await?;
        self.request_challenge_with(&document).await
    }

    pub(super) async fn request_challenge_with(
        &self,
        document: &DiscoveryDocument,
    ) -> Result<ChallengeSession> {
        let verifier = self.crypto.generate_verifier()?;
        let state = self.crypto.generate_state()?;
        let nonce = self.crypto.generate_nonce()?;
        let code_challenge = CryptoBox::code_challenge(&verifier);

        let challenge = self
            .env
            .transport
            .request_challenge(
                &code_challenge,
                pkce::CODE_CHALLENGE_METHOD,
                &state,
                &nonce,
                document,
            )
            .await?;

        if !challenge.challenge.verify_with(document.signing_certificate(), self.crypto.curves())? {
            tracing::warn!("Challenge signature does not match the signing certificate");
            return Err(ValidationError::InvalidSignature.into());
        }
        let expires_at = challenge.expires_at()?;
        if self.now() >= expires_at {
            return Err(ValidationError::ChallengeExpired.into());
        }
        tracing::debug!(expires_at = %expires_at, "Challenge issued");
        Ok(ChallengeSession::new(challenge, verifier, state, nonce))
    }

    /// A new challenge session each time the previous one expires.
    ///
    /// The stream ends after yielding the first error.
    pub fn challenge_updates(&self) -> impl Stream<Item = Result<ChallengeSession>> + '_ {
        stream! {
            loop {
                let session = match self.request_challenge().await {
                    Ok(session) => session,
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                };
                let remaining = session
                    .challenge
                    .expires_at()
                    .ok()
                    .and_then(|expires_at| (expires_at - self.now()).to_std().ok())
                    .unwrap_or_default();
                yield Ok(session);
                tokio::time::sleep(remaining).await;
            }
        }
    }

    /// Submit a signed challenge.
    ///
    /// The expiry check happens before any network call.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::ChallengeExpired`] if the challenge has expired
    /// - [`IdpError::InvalidStateParameter`] if the returned state differs
    ///   from the session's
    /// - discovery document and transport errors
    pub async fn verify(&self, signed: &SignedChallenge) -> Result<ExchangeToken> {
        let session = &signed.original_challenge;
        self.ensure_unexpired(session)?;
        let document = self.current_document(false).await?;
        let envelope = signed.encrypted(&document, &self.crypto)?;
        let exchange = self.env.transport.verify(&envelope, &document).await?;
        Self::ensure_state(&exchange, session)?;
        tracing::info!("Challenge verified");
        Ok(exchange)
    }

    /// Answer a challenge with an SSO token.
    ///
    /// # Errors
    ///
    /// As [`IdpSession::verify`].
    pub async fn sso_login(&self, session: &ChallengeSession, sso_token: &str) -> Result<ExchangeToken> {
        self.ensure_unexpired(session)?;
        let document = self.current_document(false).await?;
        self.sso_login_with(session, sso_token, &document).await
    }

    pub(super) async fn sso_login_with(
        &self,
        session: &ChallengeSession,
        sso_token: &str,
        document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        let exchange = self
            .env
            .transport
            .sso_login(&session.challenge, sso_token, document)
            .await?;
        Self::ensure_state(&exchange, session)?;
        Ok(exchange)
    }

    pub(super) fn ensure_unexpired(&self, session: &ChallengeSession) -> Result<()> {
        if session.challenge.is_expired(self.now())? {
            tracing::debug!("Challenge expired before submission");
            return Err(ValidationError::ChallengeExpired.into());
        }
        Ok(())
    }

    pub(super) fn ensure_state(exchange: &ExchangeToken, session: &ChallengeSession) -> Result<()> {
        if session.validate_state(&exchange.state) {
            Ok(())
        } else {
            tracing::warn!("State returned by the identity provider does not match");
            Err(IdpError::InvalidStateParameter)
        }
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::base64url_encode;
    use crate::mocks::{SequenceRandom, SoftwareSigner, TransportCall};
    use crate::crypto::backend::{Agreement, CurveBackend, Curves, P256Backend};
    use crate::crypto::curve::{Curve, EcPublicKey};
    use crate::session::test_support::{START, harness, harness_with_curves, harness_with_random, login};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::Duration;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_random_values_are_drawn_in_order() {
        let h = harness_with_random(SequenceRandom::new([
            vec![1; 32],
            vec![2; 16],
            vec![3; 16],
        ]));

        let session = h.session.request_challenge().await.unwrap();

        assert_eq!(session.verifier_code, base64url_encode(&[1; 32]));
        assert_eq!(session.state, base64url_encode(&[2; 16]));
        assert_eq!(session.nonce, base64url_encode(&[3; 16]));
        let claims = session.challenge.claims().unwrap();
        assert_eq!(
            claims.code_challenge.as_deref(),
            Some(CryptoBox::code_challenge(&session.verifier_code).as_str())
        );
        assert_eq!(claims.code_challenge_method.as_deref(), Some("S256"));
    }

    #[tokio::test]
    async fn test_forged_challenge_is_rejected() {
        let h = harness();
        h.transport.forge_challenge_signature(true);

        let error = h.session.request_challenge().await.unwrap_err();

        assert_eq!(error, IdpError::Validation(ValidationError::InvalidSignature));
    }

    #[tokio::test]
    async fn test_verify_returns_exchange_token() {
        let h = harness();
        let session = h.session.request_challenge().await.unwrap();
        let signed = session.sign(&SoftwareSigner::card()).await.unwrap();

        let exchange = h.session.verify(&signed).await.unwrap();

        assert_eq!(exchange.state, session.state);
        assert!(exchange.sso.is_some());
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_state() {
        let h = harness();
        h.transport.override_state(Some("other"));
        let session = h.session.request_challenge().await.unwrap();
        let signed = session.sign(&SoftwareSigner::card()).await.unwrap();

        let error = h.session.verify(&signed).await.unwrap_err();

        assert_eq!(error, IdpError::InvalidStateParameter);
    }

    #[tokio::test]
    async fn test_expired_challenge_fails_before_network() {
        let h = harness();
        let session = h.session.request_challenge().await.unwrap();
        let signed = session.sign(&SoftwareSigner::card()).await.unwrap();
        h.clock.advance(Duration::seconds(180));

        let error = h.session.verify(&signed).await.unwrap_err();

        assert_eq!(error, IdpError::Validation(ValidationError::ChallengeExpired));
        assert_eq!(h.transport.call_count(TransportCall::Verify), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_updates_reissue_after_expiry() {
        let h = harness();
        let updates = h.session.challenge_updates();
        futures::pin_mut!(updates);

        let first = updates.next().await.unwrap().unwrap();
        let second = updates.next().await.unwrap().unwrap();

        assert_ne!(first.state, second.state);
        assert_ne!(
            first.challenge.claims().unwrap().jti,
            second.challenge.claims().unwrap().jti
        );
        assert_eq!(h.transport.call_count(TransportCall::RequestChallenge), 2);
        assert_eq!(first.challenge.claims().unwrap().iat, Some(START));
    }

    #[derive(Default)]
    struct CountingP256 {
        verified: AtomicUsize,
    }

    impl CurveBackend for CountingP256 {
        fn curve(&self) -> Curve {
            Curve::P256
        }

        fn verify(&self, public_key: &EcPublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
            self.verified.fetch_add(1, Ordering::SeqCst);
            P256Backend.verify(public_key, message, signature)
        }

        fn agree_ephemeral(&self, recipient: &EcPublicKey) -> Result<Agreement> {
            P256Backend.agree_ephemeral(recipient)
        }
    }

    #[tokio::test]
    async fn test_session_verifies_with_environment_curves() {
        let backend = Arc::new(CountingP256::default());
        let h = harness_with_curves(Curves::new().with_backend(backend.clone()));

        login(&h).await;

        // discovery document, challenge, ID token
        assert!(backend.verified.load(Ordering::SeqCst) >= 3);
    }
}
