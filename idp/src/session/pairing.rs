//! Device pairing and biometric login.

use super::IdpSession;
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::Jwt;
use crate::error::{IdpError, Result};
use crate::models::{
    DiscoveryDocument, ExchangeToken, PairingEntries, PairingEntry, RegistrationData,
    SignedAuthenticationData, Token,
};
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Register a device key as an alternative to the health card.
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decoding`] if `token` does not hold a JWT access token
    /// - discovery document, encryption and transport errors
    pub async fn pair_device(&self, registration: &RegistrationData, token: &Token) -> Result<PairingEntry> {
        let document = self.current_document(false).await?;
        let registration_data = registration.encrypted(&document, &self.crypto)?;
        let access_token = self.nested_access_token(token, &document)?;
        let entry = self
            .env
            .transport
            .register_device(&registration_data, &access_token, &document)
            .await?;
        tracing::info!(device = %entry.name, "Device paired");
        Ok(entry)
    }

    /// Remove the pairing of `key_identifier` using the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::TokenUnavailable`] without contacting the identity
    /// provider if no valid token is stored.
    pub async fn unregister_device(&self, key_identifier: &str) -> Result<bool> {
        let token = self.current_token().ok_or(IdpError::TokenUnavailable)?;
        let document = self.current_document(false).await?;
        let access_token = self.nested_access_token(&token, &document)?;
        let removed = self
            .env
            .transport
            .unregister_device(key_identifier, &access_token, &document)
            .await?;
        tracing::info!(removed, "Device unregistered");
        Ok(removed)
    }

    /// Pairings of the insurant `token` belongs to.
    ///
    /// # Errors
    ///
    /// As [`IdpSession::pair_device`].
    pub async fn list_devices(&self, token: &Token) -> Result<PairingEntries> {
        let document = self.current_document(false).await?;
        let access_token = self.nested_access_token(token, &document)?;
        self.env.transport.list_devices(&access_token, &document).await
    }

    /// Submit authentication data signed by a paired device key.
    ///
    /// # Errors
    ///
    /// As [`IdpSession::verify`].
    pub async fn alt_verify(&self, signed: &SignedAuthenticationData) -> Result<ExchangeToken> {
        let session = &signed.original_challenge;
        self.ensure_unexpired(session)?;
        let document = self.current_document(false).await?;
        let envelope = signed.encrypted(&document, &self.crypto)?;
        let exchange = self.env.transport.alt_verify(&envelope, &document).await?;
        Self::ensure_state(&exchange, session)?;
        tracing::info!("Biometric authentication verified");
        Ok(exchange)
    }

    /// The access token as a nested JWE expiring with the token.
    fn nested_access_token(&self, token: &Token, document: &DiscoveryDocument) -> Result<Jwe> {
        let access_token = Jwt::parse(&token.access_token)?;
        let expires = token.access_token_payload()?.exp;
        Jwe::nest(
            &access_token,
            document.encryption_public_key(),
            Some(expires),
            &self.crypto,
        )
    }
}
