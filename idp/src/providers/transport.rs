//! Transport client trait.
//!
//! Implementations perform the HTTP calls against the endpoints of the
//! discovery document and return decoded domain objects. Error bodies are
//! mapped to [`IdpError::ServerError`](crate::error::IdpError::ServerError),
//! connectivity failures to [`IdpError::Network`](crate::error::IdpError::Network).

use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::Jwt;
use crate::error::Result;
use crate::models::{
    DiscoveryDocument, ExchangeToken, ExtAuthRequest, ExtAuthVerify, IdpChallenge,
    PairingEntries, PairingEntry, TokenPayload,
};
use std::future::Future;
use url::Url;

/// HTTP client of the identity provider.
pub trait IdpTransport: Send + Sync {
    /// Fetch and assemble the discovery document and the published keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or decoding fails.
    fn fetch_discovery_document(&self) -> impl Future<Output = Result<DiscoveryDocument>> + Send;

    /// Request a challenge for a code challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or decoding fails.
    fn request_challenge(
        &self,
        code_challenge: &str,
        method: &str,
        state: &str,
        nonce: &str,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<IdpChallenge>> + Send;

    /// Submit an encrypted signed challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the identity provider rejects
    /// the response.
    fn verify(
        &self,
        signed_challenge: &Jwe,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Answer a challenge with an SSO token instead of a signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the SSO token is rejected.
    fn sso_login(
        &self,
        challenge: &IdpChallenge,
        sso_token: &str,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Exchange an authorization code for an encrypted token payload.
    ///
    /// `redirect_uri` overrides the client's registered redirect URI.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the code is rejected.
    fn exchange(
        &self,
        token: &ExchangeToken,
        key_verifier: &Jwe,
        redirect_uri: Option<&str>,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<TokenPayload>> + Send;

    /// Register a device pairing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the pairing is rejected.
    fn register_device(
        &self,
        registration_data: &Jwe,
        token: &Jwe,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<PairingEntry>> + Send;

    /// Remove a device pairing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn unregister_device(
        &self,
        key_identifier: &str,
        token: &Jwe,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// List device pairings.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or decoding fails.
    fn list_devices(
        &self,
        token: &Jwe,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<PairingEntries>> + Send;

    /// Submit encrypted biometric authentication data.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the signature is rejected.
    fn alt_verify(
        &self,
        signed_authentication_data: &Jwe,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Fetch the signed directory of sectoral identity providers.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or decoding fails.
    fn load_directory_kk_apps(
        &self,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<Jwt>> + Send;

    /// Start federated authentication, returning the URL to open.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    fn start_ext_auth(
        &self,
        request: &ExtAuthRequest,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<Url>> + Send;

    /// Complete federated authentication with the callback parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the code is rejected.
    fn ext_auth_verify(
        &self,
        verify: &ExtAuthVerify,
        document: &DiscoveryDocument,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;
}
