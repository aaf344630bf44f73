//! Token lifecycle: exchange, SSO refresh and observation.

use super::IdpSession;
use crate::error::{IdpError, Result};
use crate::models::{ChallengeSession, DiscoveryDocument, ExchangeToken, KeyVerifier, Token};
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use async_stream::stream;
use constant_time_eq::constant_time_eq;
use futures::Stream;
use std::sync::atomic::Ordering;

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Exchange an authorization code for a token and store it.
    ///
    /// # Errors
    ///
    /// - [`IdpError::InvalidStateParameter`] if the code belongs to another session
    /// - [`IdpError::Decryption`] / [`IdpError::Decoding`] for unreadable token payloads
    /// - [`IdpError::InvalidSignature`] if the ID token is not signed by the
    ///   identity provider
    /// - [`IdpError::InvalidNonce`] if the ID token nonce differs from the session's
    pub async fn exchange(&self, exchange: &ExchangeToken, session: &ChallengeSession) -> Result<Token> {
        let document = self.current_document(false).await?;
        let token = self
            .exchange_code(exchange, &session.state, &session.verifier_code, None, &document)
            .await?;
        Self::ensure_nonce(&token, &session.nonce)?;
        self.env.storage.set_token(Some(token.clone()));
        tracing::info!(expires = %token.expires, "Token stored");
        Ok(token)
    }

    /// Redeem `exchange` with the verifier of the attempt that produced it.
    ///
    /// Nothing is stored.
    pub(super) async fn exchange_code(
        &self,
        exchange: &ExchangeToken,
        expected_state: &str,
        verifier_code: &str,
        redirect_uri: Option<&str>,
        document: &DiscoveryDocument,
    ) -> Result<Token> {
        if !constant_time_eq(exchange.state.as_bytes(), expected_state.as_bytes()) {
            return Err(IdpError::InvalidStateParameter);
        }
        let token_key = self.crypto.generate_token_key()?;
        let key_verifier = KeyVerifier::new(&token_key, verifier_code).encrypted(document, &self.crypto)?;
        let payload = self
            .env
            .transport
            .exchange(exchange, &key_verifier, redirect_uri, document)
            .await?;

        let decrypted = payload.decrypted(&token_key)?;
        if !decrypted.id_token.verify_with(document.signing_certificate(), self.crypto.curves())? {
            tracing::warn!("ID token signature does not match the signing certificate");
            return Err(IdpError::InvalidSignature("ID_TOKEN".to_string()));
        }

        let redirect = redirect_uri.map_or_else(|| self.client.redirect_uri.to_string(), str::to_string);
        let sso_token = exchange.sso.clone().or_else(|| decrypted.sso_token.clone());
        Ok(Token::from_payload(&decrypted, self.now(), redirect)?.with_sso_token(sso_token))
    }

    pub(super) fn ensure_nonce(token: &Token, expected: &str) -> Result<()> {
        let nonce = token.id_token_payload()?.nonce;
        match nonce {
            Some(nonce) if constant_time_eq(nonce.as_bytes(), expected.as_bytes()) => Ok(()),
            _ => {
                tracing::warn!("ID token nonce does not match the session");
                Err(IdpError::InvalidNonce)
            }
        }
    }

    /// Renew the stored token with its SSO token.
    ///
    /// Concurrent calls collapse into one: callers that waited for a refresh
    /// in progress receive its result, success or error, instead of starting
    /// another. A stored token that does not need renewal yet is returned
    /// as is.
    ///
    /// A rejection by the identity provider clears the stored token. Other
    /// failures leave it in place.
    ///
    /// # Errors
    ///
    /// - [`IdpError::TokenUnavailable`] if no token with an SSO token is stored
    /// - any error of the challenge, SSO login or exchange steps
    pub async fn refresh(&self) -> Result<Token> {
        let seen = self.refresh_generation.load(Ordering::Acquire);
        let mut last_outcome = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != seen {
            if let Some(outcome) = last_outcome.clone() {
                tracing::debug!("Joined a concurrent refresh");
                return outcome;
            }
        }

        let Some(current) = self.env.storage.token() else {
            return Err(IdpError::TokenUnavailable);
        };
        if !current.needs_refresh(self.now(), self.config.refresh_leeway) {
            tracing::debug!("Stored token is still fresh");
            return Ok(current);
        }
        let Some(sso_token) = current.sso_token.clone() else {
            return Err(IdpError::TokenUnavailable);
        };

        let outcome = self.refresh_stored(&current, sso_token).await;
        *last_outcome = Some(outcome.clone());
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn refresh_stored(&self, current: &Token, sso_token: String) -> Result<Token> {
        match self.refresh_with_sso(current, &sso_token).await {
            Ok(refreshed) => {
                let refreshed = if refreshed.sso_token.is_some() {
                    refreshed
                } else {
                    refreshed.with_sso_token(Some(sso_token))
                }
                .with_ext_auth(current.is_ext_auth);
                self.env.storage.set_token(Some(refreshed.clone()));
                tracing::info!(expires = %refreshed.expires, "Token refreshed");
                Ok(refreshed)
            }
            Err(error) => {
                if matches!(error, IdpError::ServerError(_)) {
                    tracing::warn!(error = %error, "SSO token rejected, clearing token");
                    self.env.storage.set_token(None);
                } else {
                    tracing::info!(error = %error, "Token refresh failed");
                }
                Err(error)
            }
        }
    }

    async fn refresh_with_sso(&self, current: &Token, sso_token: &str) -> Result<Token> {
        let document = self.current_document(false).await?;
        let session = self.request_challenge_with(&document).await?;
        let exchange = self.sso_login_with(&session, sso_token, &document).await?;
        let redirect_uri = current.is_ext_auth.then_some(current.redirect.as_str());
        let token = self
            .exchange_code(&exchange, &session.state, &session.verifier_code, redirect_uri, &document)
            .await?;
        Self::ensure_nonce(&token, &session.nonce)?;
        Ok(token)
    }

    /// The stored token while it is valid, silently renewed once it expires.
    ///
    /// Returns `Ok(None)` when no token is stored, or when it expired and
    /// cannot be renewed.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Network`] if renewal failed for lack of connectivity.
    pub async fn auto_refreshed_token(&self) -> Result<Option<Token>> {
        let Some(token) = self.env.storage.token() else {
            return Ok(None);
        };
        if !token.needs_refresh(self.now(), self.config.refresh_leeway) {
            return Ok(Some(token));
        }
        if token.sso_token.is_none() {
            return Ok(None);
        }
        match self.refresh().await {
            Ok(token) => Ok(Some(token)),
            Err(error) if error.is_no_internet() => Err(error),
            Err(error) => {
                tracing::debug!(error = %error, "Expired token could not be renewed");
                Ok(None)
            }
        }
    }

    /// Time left until `token` is due for renewal, zero once it is.
    fn until_due(&self, token: &Token) -> std::time::Duration {
        token
            .expires
            .checked_sub_signed(self.config.refresh_leeway)
            .map_or(std::time::Duration::ZERO, |due| {
                (due - self.now()).to_std().unwrap_or_default()
            })
    }

    /// The stored token if it has not expired. Never refreshes.
    #[must_use]
    pub fn current_token(&self) -> Option<Token> {
        self.env
            .storage
            .token()
            .filter(|token| token.is_valid_at(self.now()))
    }

    /// Whether a valid token is available, renewing it if needed.
    pub async fn is_logged_in(&self) -> bool {
        matches!(self.auto_refreshed_token().await, Ok(Some(_)))
    }

    /// Drop the stored token. The discovery document is kept.
    pub fn invalidate_access_token(&self) {
        tracing::info!("Access token invalidated");
        self.env.storage.set_token(None);
    }

    /// The auto-refreshed token, re-evaluated on every storage change and at
    /// each expiry. Consecutive equal values are yielded once.
    ///
    /// An expiry that passed while the consumer was not polling is acted on
    /// at the next poll. After an error the token is re-evaluated once
    /// [`IdpConfig::refresh_retry_interval`](crate::IdpConfig) has elapsed.
    pub fn token_updates(&self) -> impl Stream<Item = Result<Option<Token>>> + '_ {
        stream! {
            let mut changes = self.env.storage.subscribe_token();
            changes.borrow_and_update();
            let mut last: Option<Option<Token>> = None;
            loop {
                let failed = match self.auto_refreshed_token().await {
                    Ok(current) => {
                        if last.as_ref() != Some(&current) {
                            last = Some(current.clone());
                            yield Ok(current);
                        }
                        false
                    }
                    Err(error) => {
                        yield Err(error);
                        true
                    }
                };

                let wait = if failed {
                    Some(self.config.refresh_retry_interval.to_std().unwrap_or_default())
                } else {
                    last.clone().flatten().map(|token| self.until_due(&token))
                };
                let expiry = async {
                    match wait {
                        Some(remaining) => tokio::time::sleep(remaining).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = expiry => {}
                }
            }
        }
    }
}
