//! Transport of the demo mode.
//!
//! The demo app runs without an identity provider. Every call fails with
//! [`IdpError::NotAvailableInDemoMode`] so the UI can explain why.

use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::Jwt;
use crate::error::{IdpError, Result};
use crate::models::{
    DiscoveryDocument, ExchangeToken, ExtAuthRequest, ExtAuthVerify, IdpChallenge,
    PairingEntries, PairingEntry, TokenPayload,
};
use crate::providers::IdpTransport;
use url::Url;

/// Transport refusing every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoTransport;

impl IdpTransport for DemoTransport {
    async fn fetch_discovery_document(&self) -> Result<DiscoveryDocument> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn request_challenge(
        &self,
        _code_challenge: &str,
        _method: &str,
        _state: &str,
        _nonce: &str,
        _document: &DiscoveryDocument,
    ) -> Result<IdpChallenge> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn verify(&self, _signed_challenge: &Jwe, _document: &DiscoveryDocument) -> Result<ExchangeToken> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn sso_login(
        &self,
        _challenge: &IdpChallenge,
        _sso_token: &str,
        _document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn exchange(
        &self,
        _token: &ExchangeToken,
        _key_verifier: &Jwe,
        _redirect_uri: Option<&str>,
        _document: &DiscoveryDocument,
    ) -> Result<TokenPayload> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn register_device(
        &self,
        _registration_data: &Jwe,
        _token: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<PairingEntry> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn unregister_device(
        &self,
        _key_identifier: &str,
        _token: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<bool> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn list_devices(&self, _token: &Jwe, _document: &DiscoveryDocument) -> Result<PairingEntries> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn alt_verify(
        &self,
        _signed_authentication_data: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn load_directory_kk_apps(&self, _document: &DiscoveryDocument) -> Result<Jwt> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn start_ext_auth(&self, _request: &ExtAuthRequest, _document: &DiscoveryDocument) -> Result<Url> {
        Err(IdpError::NotAvailableInDemoMode)
    }

    async fn ext_auth_verify(
        &self,
        _verify: &ExtAuthVerify,
        _document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        Err(IdpError::NotAvailableInDemoMode)
    }
}
