//! In-process identity provider.
//!
//! Holds the fixture keys and runs the server side of every call: issues
//! signed challenges, opens the client's envelopes with the encryption key,
//! checks PKCE and issues token payloads encrypted under the client's token
//! key. Behavior can be bent per test (state/nonce overrides, scripted
//! failures, forged signatures).

use crate::constants::content_type;
use crate::crypto::curve::Certificate;
use crate::crypto::jwe::Jwe;
use crate::crypto::jwt::{JwsAlgorithm, Jwt, JwtHeader, NestedJwt};
use crate::crypto::{CryptoBox, SymmetricKey, base64url_decode};
use crate::environment::{Clock, SystemClock};
use crate::error::{IdpError, Result, ServerResponse};
use crate::mocks::fixtures;
use crate::models::{
    AuthenticationData, ChallengeClaims, DiscoveryDocument, ExchangeToken, ExtAuthRequest,
    ExtAuthVerify, IdTokenPayload, IdpChallenge, KeyVerifier, PairingData, PairingEntries,
    PairingEntry, RegistrationData, TokenPayload, UserConsent,
};
use crate::providers::IdpTransport;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use url::Url;

/// Challenge lifetime in seconds.
pub const CHALLENGE_LIFETIME_SECONDS: i64 = 180;

/// Access token lifetime in seconds.
pub const TOKEN_LIFETIME_SECONDS: i64 = 300;

/// A call made against the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCall {
    /// `fetch_discovery_document`
    FetchDiscoveryDocument,
    /// `request_challenge`
    RequestChallenge,
    /// `verify`
    Verify,
    /// `sso_login`
    SsoLogin,
    /// `exchange`
    Exchange,
    /// `register_device`
    RegisterDevice,
    /// `unregister_device`
    UnregisterDevice,
    /// `list_devices`
    ListDevices,
    /// `alt_verify`
    AltVerify,
    /// `load_directory_kk_apps`
    LoadDirectoryKkApps,
    /// `start_ext_auth`
    StartExtAuth,
    /// `ext_auth_verify`
    ExtAuthVerify,
}

#[derive(Debug, Clone)]
struct IssuedChallenge {
    code_challenge: String,
    state: String,
    nonce: String,
}

#[derive(Debug, Clone)]
struct IssuedCode {
    code_challenge: String,
    nonce: String,
    sso_token: Option<String>,
}

#[derive(Debug)]
struct ServerState {
    discovery_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    forge_discovery_signature: bool,
    forge_challenge_signature: bool,
    forge_directory_signature: bool,
    issue_sso_tokens: bool,
    state_override: Option<String>,
    nonce_override: Option<String>,
    directory: serde_json::Value,
    challenges: HashMap<String, IssuedChallenge>,
    codes: HashMap<String, IssuedCode>,
    sso_tokens: HashSet<String>,
    ext_auth_requests: HashMap<String, ExtAuthRequest>,
    devices: Vec<PairingEntry>,
    failures: HashMap<TransportCall, IdpError>,
    calls: Vec<TransportCall>,
    counter: u64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            discovery_window: None,
            forge_discovery_signature: false,
            forge_challenge_signature: false,
            forge_directory_signature: false,
            issue_sso_tokens: true,
            state_override: None,
            nonce_override: None,
            directory: json!({
                "fed_idp_list": [
                    {"idp_name": "Test Kasse", "idp_iss": "https://kk.test", "idp_logo": "https://kk.test/logo.png", "idp_sek_2": true},
                    {"idp_name": "andere Kasse", "idp_iss": "https://andere.test", "idp_sek_2": false}
                ]
            }),
            challenges: HashMap::new(),
            codes: HashMap::new(),
            sso_tokens: HashSet::new(),
            ext_auth_requests: HashMap::new(),
            devices: Vec::new(),
            failures: HashMap::new(),
            calls: Vec::new(),
            counter: 0,
        }
    }
}

/// Scripted identity provider.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Clone)]
pub struct MockTransport {
    clock: Arc<dyn Clock>,
    crypto: CryptoBox,
    state: Arc<Mutex<ServerState>>,
    held: Arc<watch::Sender<HashSet<TransportCall>>>,
}

impl MockTransport {
    /// Identity provider on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Identity provider reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            crypto: CryptoBox::new(
                Arc::new(crate::crypto::random::OsRandom),
                crate::config::RandomLengths::default(),
            ),
            state: Arc::new(Mutex::new(ServerState::default())),
            held: Arc::new(watch::Sender::new(HashSet::new())),
        }
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Publish discovery documents with this creation and expiry instead of
    /// `now` and `now + 24h`.
    pub fn set_discovery_window(&self, created_on: DateTime<Utc>, expires_on: DateTime<Utc>) {
        self.with_state(|state| state.discovery_window = Some((created_on, expires_on)));
    }

    /// Sign discovery documents with a key other than the discovery key.
    pub fn forge_discovery_signature(&self, forge: bool) {
        self.with_state(|state| state.forge_discovery_signature = forge);
    }

    /// Sign challenges with a key other than the signing key.
    pub fn forge_challenge_signature(&self, forge: bool) {
        self.with_state(|state| state.forge_challenge_signature = forge);
    }

    /// Sign the directory with a key other than the signing key.
    pub fn forge_directory_signature(&self, forge: bool) {
        self.with_state(|state| state.forge_directory_signature = forge);
    }

    /// Whether verified challenges yield an SSO token.
    pub fn issue_sso_tokens(&self, issue: bool) {
        self.with_state(|state| state.issue_sso_tokens = issue);
    }

    /// Return this state in exchange tokens instead of the requested one.
    pub fn override_state(&self, state_value: Option<&str>) {
        self.with_state(|state| state.state_override = state_value.map(str::to_string));
    }

    /// Put this nonce into ID tokens instead of the requested one.
    pub fn override_nonce(&self, nonce: Option<&str>) {
        self.with_state(|state| state.nonce_override = nonce.map(str::to_string));
    }

    /// Replace the directory payload.
    pub fn set_directory(&self, directory: serde_json::Value) {
        self.with_state(|state| state.directory = directory);
    }

    /// Fail the next `call` with `error`.
    pub fn fail_next(&self, call: TransportCall, error: IdpError) {
        self.with_state(|state| {
            state.failures.insert(call, error);
        });
    }

    /// Suspend every `call` after it is recorded until [`MockTransport::release`].
    pub fn hold(&self, call: TransportCall) {
        self.held.send_modify(|held| {
            held.insert(call);
        });
    }

    /// Let held `call`s proceed.
    pub fn release(&self, call: TransportCall) {
        self.held.send_modify(|held| {
            held.remove(&call);
        });
    }

    /// Calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Number of times `call` was made.
    #[must_use]
    pub fn call_count(&self, call: TransportCall) -> usize {
        self.with_state(|state| state.calls.iter().filter(|made| **made == call).count())
    }

    /// Registered pairings.
    #[must_use]
    pub fn devices(&self) -> Vec<PairingEntry> {
        self.with_state(|state| state.devices.clone())
    }

    async fn admit(&self, call: TransportCall) -> Result<()> {
        self.with_state(|state| state.calls.push(call));
        let mut held = self.held.subscribe();
        // The sender lives in `self`, so the wait ends only on release.
        let _ = held.wait_for(|held| !held.contains(&call)).await;
        self.with_state(|state| state.failures.remove(&call).map_or(Ok(()), Err))
    }

    fn rejected(&self, text: &str) -> IdpError {
        IdpError::ServerError(ServerResponse::new(
            "invalid_request",
            text,
            self.clock.now().timestamp(),
            "mock-uuid",
            "-1",
        ))
    }

    fn next_id(&self, prefix: &str) -> String {
        self.with_state(|state| {
            state.counter += 1;
            format!("{prefix}-{}", state.counter)
        })
    }

    fn open(&self, envelope: &Jwe) -> Result<Vec<u8>> {
        envelope
            .decrypt(&fixtures::encryption_key())
            .map_err(|_| self.rejected("envelope not decryptable"))
    }

    fn open_nested(&self, envelope: &Jwe) -> Result<Jwt> {
        let nested: NestedJwt = serde_json::from_slice(&self.open(envelope)?)
            .map_err(|_| self.rejected("envelope is not a nested JWT"))?;
        Jwt::parse(&nested.njwt).map_err(|_| self.rejected("nested JWT malformed"))
    }

    /// Verify a JWT against the leaf of its own `x5c`.
    fn verify_self_signed(&self, jwt: &Jwt) -> Result<Certificate> {
        let certificate = jwt
            .header()
            .certificate()
            .map_err(|_| self.rejected("signer certificate missing"))?;
        if jwt.verify(&certificate).unwrap_or(false) {
            Ok(certificate)
        } else {
            Err(self.rejected("signature invalid"))
        }
    }

    fn authorize(&self, token: &Jwe) -> Result<()> {
        let access_token = self.open_nested(token)?;
        let valid = access_token
            .verify(&fixtures::signing_certificate())
            .unwrap_or(false);
        let expired = access_token
            .decode_payload::<serde_json::Value>()
            .ok()
            .and_then(|claims| claims["exp"].as_i64())
            .is_none_or(|exp| exp <= self.clock.now().timestamp());
        if valid && !expired {
            Ok(())
        } else {
            Err(self.rejected("access token invalid"))
        }
    }

    fn answer_challenge(&self, challenge: &str) -> Result<ExchangeToken> {
        let now = self.clock.now().timestamp();
        let jwt = Jwt::parse(challenge).map_err(|_| self.rejected("challenge malformed"))?;
        let claims: ChallengeClaims = jwt
            .decode_payload()
            .map_err(|_| self.rejected("challenge malformed"))?;
        if claims.exp <= now {
            return Err(self.rejected("challenge expired"));
        }
        let issued = self
            .with_state(|state| state.challenges.get(challenge).cloned())
            .ok_or_else(|| self.rejected("unknown challenge"))?;
        Ok(self.issue_code(issued.code_challenge, issued.nonce, issued.state))
    }

    fn issue_code(&self, code_challenge: String, nonce: String, requested_state: String) -> ExchangeToken {
        let code = self.next_id("code");
        let sso_token = self
            .with_state(|state| state.issue_sso_tokens)
            .then(|| self.next_id("sso"));
        self.with_state(|state| {
            if let Some(sso) = &sso_token {
                state.sso_tokens.insert(sso.clone());
            }
            state.codes.insert(
                code.clone(),
                IssuedCode {
                    code_challenge,
                    nonce,
                    sso_token: sso_token.clone(),
                },
            );
            ExchangeToken {
                code,
                sso: sso_token,
                state: state.state_override.clone().unwrap_or(requested_state),
            }
        })
    }

    fn sign_claims<C: serde::Serialize>(&self, claims: &C, forged: bool) -> Jwt {
        let key = if forged {
            fixtures::card_key()
        } else {
            fixtures::signing_key()
        };
        let header =
            JwtHeader::new(JwsAlgorithm::Es256).with_certificates(&[fixtures::signing_certificate()]);
        fixtures::sign_jwt(header, claims, &key)
    }

    fn token_payload(&self, issued: &IssuedCode, token_key: &SymmetricKey) -> Result<TokenPayload> {
        let now = self.clock.now().timestamp();
        let access_token = self.sign_claims(
            &json!({
                "exp": now + TOKEN_LIFETIME_SECONDS,
                "iat": now,
                "sub": "X110000001",
                "client_id": "eRezeptApp",
            }),
            false,
        );
        let nonce = self
            .with_state(|state| state.nonce_override.clone())
            .unwrap_or_else(|| issued.nonce.clone());
        let id_token = self.sign_claims(
            &IdTokenPayload {
                nonce: Some(nonce),
                given_name: Some("Erika".to_string()),
                family_name: Some("Mustermann".to_string()),
                id_nummer: Some("X110000001".to_string()),
                iss: Some("https://idp.test".to_string()),
                iat: Some(now),
                exp: Some(now + TOKEN_LIFETIME_SECONDS),
                ..IdTokenPayload::default()
            },
            false,
        );
        let seal = |jwt: &Jwt| -> Result<Jwe> {
            let nested = serde_json::to_vec(&NestedJwt { njwt: jwt.encoded() })?;
            Jwe::encrypt_direct(&nested, token_key, Some(content_type::NESTED_JWT), &self.crypto)
        };
        Ok(TokenPayload {
            access_token: seal(&access_token)?,
            expires_in: TOKEN_LIFETIME_SECONDS,
            id_token: seal(&id_token)?,
            sso_token: issued.sso_token.clone(),
            token_type: "Bearer".to_string(),
        })
    }

    fn paired_key_identifier(entry: &PairingEntry) -> Option<String> {
        Jwt::parse(&entry.signed_pairing_data)
            .and_then(|jwt| jwt.decode_payload::<PairingData>())
            .map(|data| data.key_identifier)
            .ok()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl IdpTransport for MockTransport {
    async fn fetch_discovery_document(&self) -> Result<DiscoveryDocument> {
        self.admit(TransportCall::FetchDiscoveryDocument).await?;
        let now = self.clock.now();
        let (window, forged) = self.with_state(|state| {
            (state.discovery_window, state.forge_discovery_signature)
        });
        let (created_on, expires_on) = window.unwrap_or((now, now + Duration::hours(24)));
        let document = fixtures::discovery_document(created_on, expires_on);
        if forged {
            Ok(fixtures::resign_discovery_document(&document, &fixtures::signing_key()))
        } else {
            Ok(document)
        }
    }

    async fn request_challenge(
        &self,
        code_challenge: &str,
        method: &str,
        state: &str,
        nonce: &str,
        _document: &DiscoveryDocument,
    ) -> Result<IdpChallenge> {
        self.admit(TransportCall::RequestChallenge).await?;
        if method != "S256" {
            return Err(self.rejected("unsupported code challenge method"));
        }
        let now = self.clock.now().timestamp();
        let claims = ChallengeClaims {
            exp: now + CHALLENGE_LIFETIME_SECONDS,
            iat: Some(now),
            nbf: Some(now),
            iss: Some("https://idp.test".to_string()),
            jti: Some(self.next_id("challenge")),
            client_id: Some("eRezeptApp".to_string()),
            scope: Some("e-rezept openid".to_string()),
            state: Some(state.to_string()),
            nonce: Some(nonce.to_string()),
            code_challenge: Some(code_challenge.to_string()),
            code_challenge_method: Some(method.to_string()),
            redirect_uri: Some("https://redirect.test/erezept".to_string()),
        };
        let forged = self.with_state(|server| server.forge_challenge_signature);
        let challenge = self.sign_claims(&claims, forged);
        self.with_state(|server| {
            server.challenges.insert(
                challenge.encoded(),
                IssuedChallenge {
                    code_challenge: code_challenge.to_string(),
                    state: state.to_string(),
                    nonce: nonce.to_string(),
                },
            );
        });
        Ok(IdpChallenge {
            challenge,
            user_consent: Some(UserConsent {
                scopes: BTreeMap::from([("openid".to_string(), "Zugriff auf den ID-Token".to_string())]),
                claims: BTreeMap::from([("given_name".to_string(), "Vorname".to_string())]),
            }),
        })
    }

    async fn verify(&self, signed_challenge: &Jwe, _document: &DiscoveryDocument) -> Result<ExchangeToken> {
        self.admit(TransportCall::Verify).await?;
        let signed = self.open_nested(signed_challenge)?;
        self.verify_self_signed(&signed)?;
        let inner: NestedJwt = signed
            .decode_payload()
            .map_err(|_| self.rejected("signed challenge malformed"))?;
        self.answer_challenge(&inner.njwt)
    }

    async fn sso_login(
        &self,
        challenge: &IdpChallenge,
        sso_token: &str,
        _document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        self.admit(TransportCall::SsoLogin).await?;
        if !self.with_state(|state| state.sso_tokens.contains(sso_token)) {
            return Err(self.rejected("unknown SSO token"));
        }
        let mut exchange = self.answer_challenge(&challenge.challenge.encoded())?;
        exchange.sso = None;
        Ok(exchange)
    }

    async fn exchange(
        &self,
        token: &ExchangeToken,
        key_verifier: &Jwe,
        _redirect_uri: Option<&str>,
        _document: &DiscoveryDocument,
    ) -> Result<TokenPayload> {
        self.admit(TransportCall::Exchange).await?;
        let verifier: KeyVerifier = serde_json::from_slice(&self.open(key_verifier)?)
            .map_err(|_| self.rejected("key verifier malformed"))?;
        let issued = self
            .with_state(|state| state.codes.remove(&token.code))
            .ok_or_else(|| self.rejected("unknown code"))?;
        if CryptoBox::code_challenge(&verifier.code_verifier) != issued.code_challenge {
            return Err(self.rejected("code verifier mismatch"));
        }
        let token_key = base64url_decode(&verifier.token_key)
            .and_then(|bytes| SymmetricKey::from_slice(&bytes))
            .map_err(|_| self.rejected("token key malformed"))?;
        self.token_payload(&issued, &token_key)
    }

    async fn register_device(
        &self,
        registration_data: &Jwe,
        token: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<PairingEntry> {
        self.admit(TransportCall::RegisterDevice).await?;
        self.authorize(token)?;
        let registration: RegistrationData = serde_json::from_slice(&self.open(registration_data)?)
            .map_err(|_| self.rejected("registration data malformed"))?;
        if !registration
            .signed_pairing_data
            .verify(&registration.auth_cert)
            .unwrap_or(false)
        {
            return Err(self.rejected("pairing data signature invalid"));
        }
        let entry = PairingEntry {
            name: registration.device_information.name,
            signed_pairing_data: registration.signed_pairing_data.encoded(),
            creation_time: self.clock.now().timestamp(),
        };
        self.with_state(|state| state.devices.push(entry.clone()));
        Ok(entry)
    }

    async fn unregister_device(
        &self,
        key_identifier: &str,
        token: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<bool> {
        self.admit(TransportCall::UnregisterDevice).await?;
        self.authorize(token)?;
        Ok(self.with_state(|state| {
            let before = state.devices.len();
            state
                .devices
                .retain(|entry| Self::paired_key_identifier(entry).as_deref() != Some(key_identifier));
            state.devices.len() != before
        }))
    }

    async fn list_devices(&self, token: &Jwe, _document: &DiscoveryDocument) -> Result<PairingEntries> {
        self.admit(TransportCall::ListDevices).await?;
        self.authorize(token)?;
        Ok(PairingEntries {
            pairing_entries: self.devices(),
        })
    }

    async fn alt_verify(
        &self,
        signed_authentication_data: &Jwe,
        _document: &DiscoveryDocument,
    ) -> Result<ExchangeToken> {
        self.admit(TransportCall::AltVerify).await?;
        let signed = self.open_nested(signed_authentication_data)?;
        self.verify_self_signed(&signed)?;
        let data: AuthenticationData = signed
            .decode_payload()
            .map_err(|_| self.rejected("authentication data malformed"))?;
        let paired = self.with_state(|state| {
            state
                .devices
                .iter()
                .any(|entry| Self::paired_key_identifier(entry).as_deref() == Some(data.key_identifier.as_str()))
        });
        if !paired {
            return Err(self.rejected("device not paired"));
        }
        self.answer_challenge(&data.challenge_token)
    }

    async fn load_directory_kk_apps(&self, _document: &DiscoveryDocument) -> Result<Jwt> {
        self.admit(TransportCall::LoadDirectoryKkApps).await?;
        let (directory, forged) =
            self.with_state(|state| (state.directory.clone(), state.forge_directory_signature));
        Ok(self.sign_claims(&directory, forged))
    }

    async fn start_ext_auth(&self, request: &ExtAuthRequest, _document: &DiscoveryDocument) -> Result<Url> {
        self.admit(TransportCall::StartExtAuth).await?;
        let mut url = Url::parse("https://kk.test/authorize")
            .map_err(|error| IdpError::Decoding(error.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", "https://idp.test")
            .append_pair("state", &request.state)
            .append_pair("kk_app_id", &request.kk_app_id);
        self.with_state(|state| {
            state
                .ext_auth_requests
                .insert(request.state.clone(), request.clone());
        });
        Ok(url)
    }

    async fn ext_auth_verify(&self, verify: &ExtAuthVerify, _document: &DiscoveryDocument) -> Result<ExchangeToken> {
        self.admit(TransportCall::ExtAuthVerify).await?;
        let request = self
            .with_state(|state| state.ext_auth_requests.remove(&verify.state))
            .ok_or_else(|| self.rejected("unknown federation state"))?;
        let mut exchange = self.issue_code(request.code_challenge, request.nonce, verify.state.clone());
        exchange.sso = None;
        Ok(exchange)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let transport = MockTransport::with_clock(Arc::new(ManualClock::at_timestamp(1_000)));
        transport.fail_next(
            TransportCall::FetchDiscoveryDocument,
            IdpError::Network(crate::error::HttpError::Timeout),
        );

        assert!(transport.fetch_discovery_document().await.is_err());
        let document = transport.fetch_discovery_document().await.unwrap();
        assert_eq!(document.created_on().timestamp(), 1_000);
        assert_eq!(transport.call_count(TransportCall::FetchDiscoveryDocument), 2);
    }

    #[tokio::test]
    async fn test_challenge_is_signed_by_signing_key() {
        let transport = MockTransport::with_clock(Arc::new(ManualClock::at_timestamp(1_000)));
        let document = transport.fetch_discovery_document().await.unwrap();
        let challenge = transport
            .request_challenge("cc", "S256", "st", "no", &document)
            .await
            .unwrap();

        assert!(challenge.challenge.verify(&fixtures::signing_certificate()).unwrap());
        let claims = challenge.claims().unwrap();
        assert_eq!(claims.exp, 1_000 + CHALLENGE_LIFETIME_SECONDS);
        assert_eq!(claims.state.as_deref(), Some("st"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_call_waits_for_release() {
        let transport = MockTransport::with_clock(Arc::new(ManualClock::at_timestamp(1_000)));
        transport.hold(TransportCall::FetchDiscoveryDocument);

        let held = tokio::time::timeout(
            std::time::Duration::from_secs(60),
            transport.fetch_discovery_document(),
        )
        .await;
        assert!(held.is_err());
        assert_eq!(transport.call_count(TransportCall::FetchDiscoveryDocument), 1);

        transport.release(TransportCall::FetchDiscoveryDocument);
        assert!(transport.fetch_discovery_document().await.is_ok());
    }
}
