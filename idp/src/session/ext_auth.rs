//! Federated authentication through sectoral identity providers.

use super::IdpSession;
use crate::constants::{callback, pkce};
use crate::crypto::CryptoBox;
use crate::error::{IdpError, Result};
use crate::models::ext_auth::redirect_without_query;
use crate::models::token::query_parameter;
use crate::models::{
    DirectorySchema, ExtAuthChallengeSession, ExtAuthRequest, ExtAuthVerify, IdTokenPayload,
    KKAppDirectory, KKAppEntry, Token,
};
use crate::providers::{ExtAuthRequestStorage, IdpStorage, IdpTransport, TrustStore};
use constant_time_eq::constant_time_eq;
use url::Url;

impl<T, TS, S, E> IdpSession<T, TS, S, E>
where
    T: IdpTransport,
    TS: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Sectoral identity providers, sorted by name.
    ///
    /// # Errors
    ///
    /// - [`IdpError::InvalidSignature`] if the directory is not signed by the
    ///   identity provider signing certificate
    /// - [`IdpError::Decoding`] if the payload matches no known schema
    pub async fn load_directory_kk_apps(&self) -> Result<KKAppDirectory> {
        let document = self.current_document(false).await?;
        let directory = self.env.transport.load_directory_kk_apps(&document).await?;
        if !directory.verify_with(document.signing_certificate(), self.crypto.curves())? {
            tracing::warn!("Directory signature does not match the signing certificate");
            return Err(IdpError::InvalidSignature("KK_APP_DIRECTORY".to_string()));
        }
        let (apps, schema) = KKAppDirectory::decode(&directory.payload()?)
            .ok_or_else(|| IdpError::Decoding("unknown directory schema".to_string()))?;
        if schema == DirectorySchema::Legacy {
            tracing::warn!(
                entries = apps.apps.len(),
                "Directory uses the legacy kk_app_list schema, all entries decoded without GID support"
            );
        }
        Ok(apps.sorted())
    }

    /// Start federated authentication with `entry`.
    ///
    /// Returns the URL to open. The attempt's verifier and nonce are kept in
    /// the ext-auth request storage under the state embedded in that URL.
    ///
    /// # Errors
    ///
    /// - [`InternalError::MissingCallbackParameter`](crate::error::InternalError::MissingCallbackParameter)
    ///   if the returned URL carries no state
    /// - discovery document and transport errors
    pub async fn start_ext_auth(&self, entry: &KKAppEntry) -> Result<Url> {
        let document = self.current_document(false).await?;
        let verifier = self.crypto.generate_verifier()?;
        let state = self.crypto.generate_state()?;
        let nonce = self.crypto.generate_nonce()?;
        let request = ExtAuthRequest {
            kk_app_id: entry.identifier.clone(),
            state,
            code_challenge: CryptoBox::code_challenge(&verifier),
            code_challenge_method: pkce::CODE_CHALLENGE_METHOD.to_string(),
            nonce: nonce.clone(),
        };

        let url = self.env.transport.start_ext_auth(&request, &document).await?;
        let state = query_parameter(&url, callback::STATE)?;
        self.env.ext_auth_requests.set(
            Some(ExtAuthChallengeSession {
                verifier_code: verifier,
                nonce,
                entry: entry.clone(),
            }),
            &state,
        );
        tracing::info!(kk_app = %entry.identifier, "Federated authentication started");
        Ok(url)
    }

    /// Complete federated authentication from the app's callback URL.
    ///
    /// The pending request is looked up before anything is sent. The ID
    /// token is handed to `validate_id_token` and must then carry the nonce
    /// of the pending request. On success the token is stored and the
    /// pending request removed.
    ///
    /// # Errors
    ///
    /// - [`InternalError::MissingCallbackParameter`](crate::error::InternalError::MissingCallbackParameter)
    ///   if `code`, `state` or `kk_app_redirect_uri` is absent
    /// - [`IdpError::ExtAuthOriginalRequestMissing`] if no request is pending
    ///   for the callback's state
    /// - [`IdpError::InvalidNonce`] if the ID token nonce differs
    /// - errors of `validate_id_token`, the exchange and the transport
    pub async fn ext_auth_verify_and_exchange<F>(&self, callback_url: &Url, validate_id_token: F) -> Result<Token>
    where
        F: FnOnce(&IdTokenPayload) -> Result<()> + Send,
    {
        let verify = ExtAuthVerify::from_callback(callback_url)?;
        let Some(pending) = self.env.ext_auth_requests.get(&verify.state) else {
            tracing::warn!("No pending federated request for callback state");
            return Err(IdpError::ExtAuthOriginalRequestMissing);
        };

        let document = self.current_document(false).await?;
        let exchange = self.env.transport.ext_auth_verify(&verify, &document).await?;
        let redirect = redirect_without_query(callback_url)?;
        let token = self
            .exchange_code(
                &exchange,
                &verify.state,
                &pending.verifier_code,
                Some(&redirect),
                &document,
            )
            .await?;

        let id_token = token.id_token_payload()?;
        validate_id_token(&id_token)?;
        let nonce_matches = id_token
            .nonce
            .as_deref()
            .is_some_and(|nonce| constant_time_eq(nonce.as_bytes(), pending.nonce.as_bytes()));
        if !nonce_matches {
            tracing::warn!("Federated ID token nonce does not match the pending request");
            return Err(IdpError::InvalidNonce);
        }

        let token = token.with_ext_auth(true);
        self.env.storage.set_token(Some(token.clone()));
        self.env.ext_auth_requests.set(None, &verify.state);
        tracing::info!(kk_app = %pending.entry.identifier, "Federated authentication completed");
        Ok(token)
    }
}

#[cfg(all(test, feature = "test-utils"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::InternalError;
    use crate::mocks::TransportCall;
    use crate::session::test_support::{Harness, harness};
    use serde_json::json;

    fn callback_for(url: &Url) -> Url {
        let state = query_parameter(url, callback::STATE).unwrap();
        let mut callback_url = Url::parse("https://redirect.test/extauth").unwrap();
        callback_url
            .query_pairs_mut()
            .append_pair("code", "kk-code")
            .append_pair("state", &state)
            .append_pair("kk_app_redirect_uri", "https://kk.test/callback");
        callback_url
    }

    async fn start(h: &Harness) -> Url {
        let directory = h.session.load_directory_kk_apps().await.unwrap();
        let entry = directory.entry("https://kk.test").unwrap().clone();
        h.session.start_ext_auth(&entry).await.unwrap()
    }

    #[tokio::test]
    async fn test_directory_is_verified_and_sorted() {
        let h = harness();

        let directory = h.session.load_directory_kk_apps().await.unwrap();

        let names: Vec<_> = directory.apps.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["andere Kasse", "Test Kasse"]);
        assert!(directory.entry("https://kk.test").unwrap().gid);
    }

    #[tokio::test]
    async fn test_legacy_directory_decodes_without_gid() {
        let h = harness();
        h.transport.set_directory(json!({
            "kk_app_list": [
                {"kk_app_name": "Zeta", "kk_app_id": "https://zeta.test"},
                {"kk_app_name": "alpha", "kk_app_id": "https://alpha.test"}
            ]
        }));

        let directory = h.session.load_directory_kk_apps().await.unwrap();

        assert_eq!(directory.apps[0].identifier, "https://alpha.test");
        assert!(directory.apps.iter().all(|entry| !entry.gid));
    }

    #[tokio::test]
    async fn test_forged_directory_is_rejected() {
        let h = harness();
        h.transport.forge_directory_signature(true);

        let error = h.session.load_directory_kk_apps().await.unwrap_err();

        assert_eq!(error, IdpError::InvalidSignature("KK_APP_DIRECTORY".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_directory_schema() {
        let h = harness();
        h.transport.set_directory(json!({"apps": []}));

        let error = h.session.load_directory_kk_apps().await.unwrap_err();

        assert!(matches!(error, IdpError::Decoding(_)));
    }

    #[tokio::test]
    async fn test_federated_login() {
        let h = harness();
        let url = start(&h).await;
        assert_eq!(h.ext_auth_requests.len(), 1);

        let token = h
            .session
            .ext_auth_verify_and_exchange(&callback_for(&url), |id_token| {
                assert_eq!(id_token.given_name.as_deref(), Some("Erika"));
                Ok(())
            })
            .await
            .unwrap();

        assert!(token.is_ext_auth);
        assert_eq!(token.redirect, "https://redirect.test/extauth");
        assert_eq!(h.storage.token(), Some(token));
        assert!(h.ext_auth_requests.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_state_fails_before_network() {
        let h = harness();
        let callback_url = Url::parse(
            "https://redirect.test/extauth?code=c&state=unknown&kk_app_redirect_uri=https%3A%2F%2Fkk.test",
        )
        .unwrap();

        let error = h
            .session
            .ext_auth_verify_and_exchange(&callback_url, |_| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(error, IdpError::ExtAuthOriginalRequestMissing);
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_code() {
        let h = harness();
        let callback_url = Url::parse("https://redirect.test/extauth?state=s").unwrap();

        let error = h
            .session
            .ext_auth_verify_and_exchange(&callback_url, |_| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(
            error,
            IdpError::Internal(InternalError::MissingCallbackParameter("code".to_string()))
        );
    }

    #[tokio::test]
    async fn test_foreign_nonce_keeps_request_pending() {
        let h = harness();
        h.transport.override_nonce(Some("foreign"));
        let url = start(&h).await;

        let error = h
            .session
            .ext_auth_verify_and_exchange(&callback_for(&url), |_| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(error, IdpError::InvalidNonce);
        assert!(h.storage.token().is_none());
        assert_eq!(h.ext_auth_requests.len(), 1);
        assert_eq!(h.transport.call_count(TransportCall::Exchange), 1);
    }

    #[tokio::test]
    async fn test_validator_rejection_is_returned() {
        let h = harness();
        let url = start(&h).await;

        let error = h
            .session
            .ext_auth_verify_and_exchange(&callback_for(&url), |_| {
                Err(IdpError::Validation(crate::error::ValidationError::MissingClaim(
                    "acr".to_string(),
                )))
            })
            .await
            .unwrap_err();

        assert!(matches!(error, IdpError::Validation(_)));
        assert!(h.storage.token().is_none());
    }

    #[tokio::test]
    async fn test_abandoned_request_expires() {
        let h = harness();
        let url = start(&h).await;
        h.clock.advance(chrono::Duration::minutes(6));

        let error = h
            .session
            .ext_auth_verify_and_exchange(&callback_for(&url), |_| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(error, IdpError::ExtAuthOriginalRequestMissing);
        assert!(h.ext_auth_requests.is_empty());
        assert_eq!(h.transport.call_count(TransportCall::ExtAuthVerify), 0);
    }
}
